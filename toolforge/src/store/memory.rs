//! In-memory backend for both adapter traits. Used by tests and local runs;
//! mirrors the ranking and upsert semantics of the persistent backend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::{AgentError, AgentResult};
use crate::store::{
    rank_matches, CapabilityStore, CompositeMatch, ExecutionLog, PatternMatch, ToolMatch,
};
use crate::types::{
    CompositeTool, ExecutionRecord, ToolManifest, ToolRelationship, WorkflowPattern,
};
use crate::utils::cosine_similarity;

#[derive(Default)]
struct Inner {
    tools: HashMap<String, ToolManifest>,
    patterns: HashMap<String, WorkflowPattern>,
    composites: HashMap<String, CompositeTool>,
    records: Vec<ExecutionRecord>,
    relationships: HashMap<(String, String, String), ToolRelationship>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> AgentResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| AgentError::Store("store lock poisoned".into()))
    }

    fn write(&self) -> AgentResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| AgentError::Store("store lock poisoned".into()))
    }
}

#[async_trait]
impl CapabilityStore for InMemoryStore {
    async fn put_tool(&self, tool: ToolManifest) -> AgentResult<()> {
        self.write()?.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    async fn get_tool(&self, name: &str) -> AgentResult<Option<ToolManifest>> {
        Ok(self.read()?.tools.get(name).cloned())
    }

    async fn search_tools(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> AgentResult<Vec<ToolMatch>> {
        let inner = self.read()?;
        let candidates = inner
            .tools
            .values()
            .filter_map(|tool| {
                let similarity = cosine_similarity(embedding, &tool.embedding);
                (similarity >= threshold).then(|| (tool.clone(), similarity, tool.updated_at))
            })
            .collect();
        Ok(rank_matches(candidates, limit)
            .into_iter()
            .map(|(tool, similarity)| ToolMatch { tool, similarity })
            .collect())
    }

    async fn delete_tool(&self, name: &str) -> AgentResult<bool> {
        Ok(self.write()?.tools.remove(name).is_some())
    }

    async fn list_tools(&self) -> AgentResult<Vec<ToolManifest>> {
        let mut tools: Vec<_> = self.read()?.tools.values().cloned().collect();
        tools.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tools)
    }

    async fn cleanup_orphaned(&self) -> AgentResult<usize> {
        let mut inner = self.write()?;
        let orphaned: Vec<String> = inner
            .tools
            .values()
            .filter(|t| t.source.trim().is_empty())
            .map(|t| t.name.clone())
            .collect();
        for name in &orphaned {
            tracing::warn!(tool = %name, "removing orphaned tool");
            inner.tools.remove(name);
        }
        Ok(orphaned.len())
    }

    async fn put_pattern(&self, pattern: WorkflowPattern) -> AgentResult<()> {
        let key = WorkflowPattern::sequence_key(&pattern.tool_sequence);
        self.write()?.patterns.insert(key, pattern);
        Ok(())
    }

    async fn get_pattern(&self, sequence_key: &str) -> AgentResult<Option<WorkflowPattern>> {
        Ok(self.read()?.patterns.get(sequence_key).cloned())
    }

    async fn search_patterns(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> AgentResult<Vec<PatternMatch>> {
        let inner = self.read()?;
        let candidates = inner
            .patterns
            .values()
            .filter_map(|pattern| {
                let similarity = cosine_similarity(embedding, &pattern.embedding);
                (similarity >= threshold).then(|| (pattern.clone(), similarity, pattern.last_seen))
            })
            .collect();
        Ok(rank_matches(candidates, limit)
            .into_iter()
            .map(|(pattern, similarity)| PatternMatch {
                pattern,
                similarity,
            })
            .collect())
    }

    async fn list_patterns(&self) -> AgentResult<Vec<WorkflowPattern>> {
        let mut patterns: Vec<_> = self.read()?.patterns.values().cloned().collect();
        patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        Ok(patterns)
    }

    async fn put_composite(&self, composite: CompositeTool) -> AgentResult<()> {
        self.write()?
            .composites
            .insert(composite.name.clone(), composite);
        Ok(())
    }

    async fn get_composite(&self, name: &str) -> AgentResult<Option<CompositeTool>> {
        Ok(self.read()?.composites.get(name).cloned())
    }

    async fn search_composites(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> AgentResult<Vec<CompositeMatch>> {
        let inner = self.read()?;
        let candidates = inner
            .composites
            .values()
            .filter_map(|composite| {
                let similarity = cosine_similarity(embedding, &composite.embedding);
                (similarity >= threshold)
                    .then(|| (composite.clone(), similarity, composite.created_at))
            })
            .collect();
        Ok(rank_matches(candidates, limit)
            .into_iter()
            .map(|(composite, similarity)| CompositeMatch {
                composite,
                similarity,
            })
            .collect())
    }

    async fn list_composites(&self) -> AgentResult<Vec<CompositeTool>> {
        Ok(self.read()?.composites.values().cloned().collect())
    }
}

#[async_trait]
impl ExecutionLog for InMemoryStore {
    async fn append(&self, record: ExecutionRecord) -> AgentResult<()> {
        self.write()?.records.push(record);
        Ok(())
    }

    async fn session_records(&self, session_id: &str) -> AgentResult<Vec<ExecutionRecord>> {
        let mut records: Vec<_> = self
            .read()?
            .records
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.execution_order);
        Ok(records)
    }

    async fn record_pair(
        &self,
        tool_a: &str,
        tool_b: &str,
        relationship_type: &str,
        success: bool,
    ) -> AgentResult<ToolRelationship> {
        let mut inner = self.write()?;
        let key = (
            tool_a.to_string(),
            tool_b.to_string(),
            relationship_type.to_string(),
        );
        let outcome = if success { 1.0 } else { 0.0 };
        let relationship = inner
            .relationships
            .entry(key)
            .and_modify(|rel| {
                rel.success_rate = WorkflowPattern::updated_rate(
                    rel.success_rate,
                    rel.frequency,
                    outcome,
                );
                rel.frequency += 1;
                rel.confidence = ToolRelationship::confidence_for(rel.frequency);
            })
            .or_insert_with(|| ToolRelationship {
                tool_a: tool_a.to_string(),
                tool_b: tool_b.to_string(),
                relationship_type: relationship_type.to_string(),
                frequency: 1,
                success_rate: outcome,
                confidence: ToolRelationship::confidence_for(1),
            });
        Ok(relationship.clone())
    }

    async fn relationships_for(
        &self,
        tool: &str,
        min_confidence: f64,
    ) -> AgentResult<Vec<ToolRelationship>> {
        let mut relationships: Vec<_> = self
            .read()?
            .relationships
            .values()
            .filter(|r| (r.tool_a == tool || r.tool_b == tool) && r.confidence >= min_confidence)
            .cloned()
            .collect();
        relationships.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(relationships)
    }
}
