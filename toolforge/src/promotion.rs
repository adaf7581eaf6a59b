//! Promotion of high-confidence workflow patterns into composite tools.
//!
//! A pattern observed often enough, with a high enough success rate and
//! confidence, becomes a first-class tool whose body is the fixed component
//! sequence. Already-promoted sequences are skipped.

use std::sync::Arc;

use chrono::Utc;

use crate::config::PromotionConfig;
use crate::errors::AgentResult;
use crate::store::CapabilityStore;
use crate::types::{CompositeTool, ToolRelationship, WorkflowPattern};

pub struct CompositePromoter {
    store: Arc<dyn CapabilityStore>,
    criteria: PromotionConfig,
}

impl CompositePromoter {
    pub fn new(store: Arc<dyn CapabilityStore>, criteria: PromotionConfig) -> Self {
        Self { store, criteria }
    }

    fn meets_criteria(&self, pattern: &WorkflowPattern) -> bool {
        pattern.tool_sequence.len() >= 2
            && pattern.frequency >= self.criteria.min_frequency()
            && pattern.success_rate >= self.criteria.min_success_rate()
            && ToolRelationship::confidence_for(pattern.frequency) >= self.criteria.min_confidence()
    }

    /// Patterns that qualify for promotion and have not been promoted yet.
    pub async fn scan_candidates(&self) -> AgentResult<Vec<WorkflowPattern>> {
        let promoted: Vec<String> = self
            .store
            .list_composites()
            .await?
            .into_iter()
            .map(|c| c.source_pattern)
            .collect();

        let candidates = self
            .store
            .list_patterns()
            .await?
            .into_iter()
            .filter(|p| self.meets_criteria(p))
            .filter(|p| {
                let key = WorkflowPattern::sequence_key(&p.tool_sequence);
                !promoted.iter().any(|s| s == &key)
            })
            .collect();
        Ok(candidates)
    }

    /// Promote one pattern. The composite inherits the pattern's embedding
    /// and statistics; its name is derived from the sequence.
    pub async fn promote(&self, pattern: &WorkflowPattern) -> AgentResult<CompositeTool> {
        let composite = CompositeTool {
            name: format!("composite_{}", pattern.tool_sequence.join("_")),
            description: format!(
                "Composite workflow: {}",
                pattern.tool_sequence.join(" -> ")
            ),
            component_tools: pattern.tool_sequence.clone(),
            embedding: pattern.embedding.clone(),
            success_rate: pattern.success_rate,
            usage_count: 0,
            created_at: Utc::now(),
            source_pattern: WorkflowPattern::sequence_key(&pattern.tool_sequence),
        };
        tracing::info!(
            composite = %composite.name,
            frequency = pattern.frequency,
            "promoting workflow pattern to composite tool"
        );
        self.store.put_composite(composite.clone()).await?;
        Ok(composite)
    }

    /// Scan and promote everything that qualifies; returns the promotions.
    pub async fn promote_all(&self) -> AgentResult<Vec<CompositeTool>> {
        let mut promoted = Vec::new();
        for pattern in self.scan_candidates().await? {
            promoted.push(self.promote(&pattern).await?);
        }
        Ok(promoted)
    }
}
