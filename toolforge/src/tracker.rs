//! Workflow Tracker: the learning loop over execution history.
//!
//! Appends execution records and mines a session's ordered tool sequence
//! into workflow patterns: the full sequence plus contiguous 2- and 3-gram
//! subsequences, upserted by sequence key with a running-average success
//! rate. Adjacent tool pairs feed pairwise relationships whose confidence is
//! derived purely from frequency — evidence volume and quality are read
//! separately.

use std::sync::Arc;

use chrono::Utc;

use crate::config::MiningConfig;
use crate::errors::AgentResult;
use crate::store::{CapabilityStore, ExecutionLog};
use crate::types::{ExecutionRecord, ToolRelationship, WorkflowPattern};

pub struct WorkflowTracker {
    log: Arc<dyn ExecutionLog>,
    store: Arc<dyn CapabilityStore>,
    mining: MiningConfig,
}

impl WorkflowTracker {
    pub fn new(
        log: Arc<dyn ExecutionLog>,
        store: Arc<dyn CapabilityStore>,
        mining: MiningConfig,
    ) -> Self {
        Self { log, store, mining }
    }

    /// Append one execution record. Records are immutable once written.
    pub async fn record(&self, record: ExecutionRecord) -> AgentResult<()> {
        tracing::debug!(
            session = %record.session_id,
            tool = %record.tool_name,
            order = record.execution_order,
            success = record.success,
            "logging execution"
        );
        self.log.append(record).await
    }

    /// Mine a session's sequence into patterns and relationships. A session
    /// with fewer than two executions has nothing to mine.
    pub async fn mine_session(
        &self,
        session_id: &str,
        intent_embedding: Option<&[f32]>,
    ) -> AgentResult<()> {
        let records = self.log.session_records(session_id).await?;
        if records.len() < 2 {
            return Ok(());
        }
        let sequence: Vec<(String, bool)> = records
            .iter()
            .map(|r| (r.tool_name.clone(), r.success))
            .collect();

        self.upsert_pattern(&sequence, session_id, intent_embedding)
            .await?;

        // Contiguous subsequences expose reusable sub-workflows inside
        // longer sessions.
        if sequence.len() >= 3 {
            for window in 2..=self.mining.max_subsequence_len() {
                if window >= sequence.len() {
                    break;
                }
                for start in 0..=(sequence.len() - window) {
                    self.upsert_pattern(
                        &sequence[start..start + window],
                        session_id,
                        intent_embedding,
                    )
                    .await?;
                }
            }
        }

        for pair in sequence.windows(2) {
            let success = pair[0].1 && pair[1].1;
            self.log
                .record_pair(&pair[0].0, &pair[1].0, "sequence", success)
                .await?;
        }
        Ok(())
    }

    async fn upsert_pattern(
        &self,
        sequence: &[(String, bool)],
        session_id: &str,
        intent_embedding: Option<&[f32]>,
    ) -> AgentResult<()> {
        let names: Vec<String> = sequence.iter().map(|(name, _)| name.clone()).collect();
        let successes = sequence.iter().filter(|(_, ok)| *ok).count();
        let outcome = successes as f64 / sequence.len() as f64;
        let key = WorkflowPattern::sequence_key(&names);
        let now = Utc::now();

        let pattern = match self.store.get_pattern(&key).await? {
            Some(mut pattern) => {
                pattern.success_rate =
                    WorkflowPattern::updated_rate(pattern.success_rate, pattern.frequency, outcome);
                pattern.frequency += 1;
                if !pattern.sessions.iter().any(|s| s == session_id) {
                    pattern.sessions.push(session_id.to_string());
                }
                if pattern.embedding.is_empty() {
                    if let Some(embedding) = intent_embedding {
                        pattern.embedding = embedding.to_vec();
                    }
                }
                pattern.last_seen = now;
                pattern
            }
            None => WorkflowPattern {
                pattern_name: names.join("_to_"),
                tool_sequence: names,
                frequency: 1,
                success_rate: outcome,
                embedding: intent_embedding.map(|e| e.to_vec()).unwrap_or_default(),
                sessions: vec![session_id.to_string()],
                created_at: now,
                last_seen: now,
            },
        };
        self.store.put_pattern(pattern).await
    }

    /// Patterns seen often enough to act on.
    pub async fn established_patterns(&self, limit: usize) -> AgentResult<Vec<WorkflowPattern>> {
        let min_frequency = self.mining.min_pattern_frequency();
        let mut patterns: Vec<_> = self
            .store
            .list_patterns()
            .await?
            .into_iter()
            .filter(|p| p.frequency >= min_frequency)
            .collect();
        patterns.truncate(limit);
        Ok(patterns)
    }

    pub async fn relationships_for(
        &self,
        tool: &str,
        min_confidence: f64,
    ) -> AgentResult<Vec<ToolRelationship>> {
        self.log.relationships_for(tool, min_confidence).await
    }

    pub async fn session_history(&self, session_id: &str) -> AgentResult<Vec<ExecutionRecord>> {
        self.log.session_records(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::ArgMap;

    fn record(session: &str, order: usize, tool: &str, success: bool) -> ExecutionRecord {
        ExecutionRecord {
            session_id: session.into(),
            tool_name: tool.into(),
            execution_order: order,
            inputs: ArgMap::new(),
            output: Some(serde_json::json!(1)),
            error: None,
            success,
            duration_ms: 3,
            user_prompt: "prompt".into(),
            timestamp: Utc::now(),
        }
    }

    fn tracker(store: Arc<InMemoryStore>) -> WorkflowTracker {
        WorkflowTracker::new(store.clone(), store, MiningConfig::default())
    }

    #[tokio::test]
    async fn mining_upserts_full_sequence_pattern() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = tracker(store.clone());

        for run in 0..2 {
            let session = format!("s{run}");
            tracker.record(record(&session, 0, "load_csv", true)).await.unwrap();
            tracker
                .record(record(&session, 1, "filter_rows", true))
                .await
                .unwrap();
            tracker.mine_session(&session, Some(&[1.0, 0.0])).await.unwrap();
        }

        let pattern = store
            .get_pattern("load_csv -> filter_rows")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pattern.frequency, 2);
        assert_eq!(pattern.success_rate, 1.0);
        assert_eq!(pattern.sessions.len(), 2);
        assert_eq!(pattern.embedding, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn mining_extracts_subsequences_of_longer_sessions() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = tracker(store.clone());

        for (order, tool) in ["a", "b", "c"].iter().enumerate() {
            tracker.record(record("s1", order, tool, true)).await.unwrap();
        }
        tracker.mine_session("s1", None).await.unwrap();

        assert!(store.get_pattern("a -> b -> c").await.unwrap().is_some());
        assert!(store.get_pattern("a -> b").await.unwrap().is_some());
        assert!(store.get_pattern("b -> c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn mining_updates_pairwise_relationships() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = tracker(store.clone());

        tracker.record(record("s1", 0, "a", true)).await.unwrap();
        tracker.record(record("s1", 1, "b", false)).await.unwrap();
        tracker.mine_session("s1", None).await.unwrap();

        let rels = tracker.relationships_for("a", 0.0).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].frequency, 1);
        assert_eq!(rels[0].success_rate, 0.0);
    }

    #[tokio::test]
    async fn single_execution_sessions_are_not_mined() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = tracker(store.clone());

        tracker.record(record("s1", 0, "a", true)).await.unwrap();
        tracker.mine_session("s1", None).await.unwrap();
        assert!(store.list_patterns().await.unwrap().is_empty());
    }
}
