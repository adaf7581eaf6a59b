//! Capability store and execution log adapters.
//!
//! The store is the single source of truth for tools, workflow patterns and
//! composite tools; the process holds no authoritative copy between
//! requests. The execution log owns execution records and tool
//! relationships. One backend struct may implement both traits, but the
//! writer separation holds: the capability-store adapter is the only writer
//! of tool/pattern/composite state, the workflow tracker (through
//! `ExecutionLog`) the only writer of records and relationships.
//!
//! Similarity search returns candidates in descending similarity above a
//! threshold cutoff, ties broken most-recent-first.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::errors::AgentResult;
use crate::types::{
    CompositeTool, ExecutionRecord, ToolManifest, ToolRelationship, WorkflowPattern,
};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct ToolMatch {
    pub tool: ToolManifest,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern: WorkflowPattern,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct CompositeMatch {
    pub composite: CompositeTool,
    pub similarity: f32,
}

#[async_trait]
pub trait CapabilityStore: Send + Sync {
    /// Upsert by name. Name collisions across concurrent writers resolve
    /// last-writer-wins at this layer.
    async fn put_tool(&self, tool: ToolManifest) -> AgentResult<()>;
    async fn get_tool(&self, name: &str) -> AgentResult<Option<ToolManifest>>;
    async fn search_tools(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> AgentResult<Vec<ToolMatch>>;
    async fn delete_tool(&self, name: &str) -> AgentResult<bool>;
    async fn list_tools(&self) -> AgentResult<Vec<ToolManifest>>;
    /// Remove tools whose backing source artifact is missing. The only bulk
    /// deletion path.
    async fn cleanup_orphaned(&self) -> AgentResult<usize>;

    async fn put_pattern(&self, pattern: WorkflowPattern) -> AgentResult<()>;
    async fn get_pattern(&self, sequence_key: &str) -> AgentResult<Option<WorkflowPattern>>;
    async fn search_patterns(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> AgentResult<Vec<PatternMatch>>;
    async fn list_patterns(&self) -> AgentResult<Vec<WorkflowPattern>>;

    async fn put_composite(&self, composite: CompositeTool) -> AgentResult<()>;
    async fn get_composite(&self, name: &str) -> AgentResult<Option<CompositeTool>>;
    async fn search_composites(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> AgentResult<Vec<CompositeMatch>>;
    async fn list_composites(&self) -> AgentResult<Vec<CompositeTool>>;
}

#[async_trait]
pub trait ExecutionLog: Send + Sync {
    /// Append-only; records are immutable once written.
    async fn append(&self, record: ExecutionRecord) -> AgentResult<()>;
    /// Records for a session in execution order.
    async fn session_records(&self, session_id: &str) -> AgentResult<Vec<ExecutionRecord>>;
    /// Transactional upsert of a pairwise relationship: bumps frequency,
    /// folds the outcome into the running success rate, rederives
    /// confidence from frequency alone.
    async fn record_pair(
        &self,
        tool_a: &str,
        tool_b: &str,
        relationship_type: &str,
        success: bool,
    ) -> AgentResult<ToolRelationship>;
    async fn relationships_for(
        &self,
        tool: &str,
        min_confidence: f64,
    ) -> AgentResult<Vec<ToolRelationship>>;
}

/// Shared ranking: descending similarity, ties most-recent-first.
pub(crate) fn rank_matches<T>(
    mut matches: Vec<(T, f32, chrono::DateTime<chrono::Utc>)>,
    limit: usize,
) -> Vec<(T, f32)> {
    matches.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.2.cmp(&a.2))
    });
    matches
        .into_iter()
        .take(limit)
        .map(|(item, similarity, _)| (item, similarity))
        .collect()
}
