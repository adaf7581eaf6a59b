//! SQLite backend for both adapter traits, in a single database file.
//!
//! Entities are stored as JSON payloads keyed by their natural identifier,
//! with the schema bootstrapped on open. Similarity search scans candidate
//! embeddings in process; a deployment backed by a real vector index swaps
//! this backend out behind the same traits.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{AgentError, AgentResult};
use crate::store::{
    rank_matches, CapabilityStore, CompositeMatch, ExecutionLog, PatternMatch, ToolMatch,
};
use crate::types::{
    CompositeTool, ExecutionRecord, ToolManifest, ToolRelationship, WorkflowPattern,
};
use crate::utils::cosine_similarity;

#[derive(Debug)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> AgentResult<Self> {
        let db_path = path.into();
        let conn = Connection::open(&db_path).map_err(store_err)?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS tools(
                name TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS patterns(
                sequence_key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                last_seen INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS composites(
                name TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS executions(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                execution_order INTEGER NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_session ON executions(session_id);
            CREATE TABLE IF NOT EXISTS relationships(
                tool_a TEXT NOT NULL,
                tool_b TEXT NOT NULL,
                relationship_type TEXT NOT NULL,
                frequency INTEGER NOT NULL,
                success_rate REAL NOT NULL,
                confidence REAL NOT NULL,
                PRIMARY KEY (tool_a, tool_b, relationship_type)
            );
            COMMIT;",
        )
        .map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    fn lock(&self) -> AgentResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AgentError::Store("connection lock poisoned".into()))
    }

    fn load_all<T: serde::de::DeserializeOwned>(&self, table: &str) -> AgentResult<Vec<T>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT payload FROM {table}"))
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(store_err)?;
        let mut items = Vec::new();
        for row in rows {
            let payload = row.map_err(store_err)?;
            items.push(serde_json::from_str(&payload).map_err(store_err)?);
        }
        Ok(items)
    }
}

fn store_err<E: std::fmt::Display>(e: E) -> AgentError {
    AgentError::Store(e.to_string())
}

fn to_payload<T: serde::Serialize>(value: &T) -> AgentResult<String> {
    serde_json::to_string(value).map_err(store_err)
}

#[async_trait]
impl CapabilityStore for SqliteStore {
    async fn put_tool(&self, tool: ToolManifest) -> AgentResult<()> {
        let payload = to_payload(&tool)?;
        self.lock()?
            .execute(
                "INSERT INTO tools(name, payload, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET payload = ?2, updated_at = ?3",
                params![tool.name, payload, tool.updated_at.timestamp()],
            )
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_tool(&self, name: &str) -> AgentResult<Option<ToolManifest>> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM tools WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(store_err))
            .transpose()
    }

    async fn search_tools(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> AgentResult<Vec<ToolMatch>> {
        let tools: Vec<ToolManifest> = self.load_all("tools")?;
        let candidates = tools
            .into_iter()
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
        let affected = self
            .lock()?
            .execute("DELETE FROM tools WHERE name = ?1", params![name])
            .map_err(store_err)?;
        Ok(affected > 0)
    }

    async fn list_tools(&self) -> AgentResult<Vec<ToolManifest>> {
        let mut tools: Vec<ToolManifest> = self.load_all("tools")?;
        tools.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tools)
    }

    async fn cleanup_orphaned(&self) -> AgentResult<usize> {
        let tools: Vec<ToolManifest> = self.load_all("tools")?;
        let mut removed = 0;
        for tool in tools.iter().filter(|t| t.source.trim().is_empty()) {
            tracing::warn!(tool = %tool.name, "removing orphaned tool");
            self.lock()?
                .execute("DELETE FROM tools WHERE name = ?1", params![tool.name])
                .map_err(store_err)?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn put_pattern(&self, pattern: WorkflowPattern) -> AgentResult<()> {
        let key = WorkflowPattern::sequence_key(&pattern.tool_sequence);
        let payload = to_payload(&pattern)?;
        self.lock()?
            .execute(
                "INSERT INTO patterns(sequence_key, payload, last_seen) VALUES (?1, ?2, ?3)
                 ON CONFLICT(sequence_key) DO UPDATE SET payload = ?2, last_seen = ?3",
                params![key, payload, pattern.last_seen.timestamp()],
            )
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_pattern(&self, sequence_key: &str) -> AgentResult<Option<WorkflowPattern>> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM patterns WHERE sequence_key = ?1",
                params![sequence_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(store_err))
            .transpose()
    }

    async fn search_patterns(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> AgentResult<Vec<PatternMatch>> {
        let patterns: Vec<WorkflowPattern> = self.load_all("patterns")?;
        let candidates = patterns
            .into_iter()
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
        let mut patterns: Vec<WorkflowPattern> = self.load_all("patterns")?;
        patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        Ok(patterns)
    }

    async fn put_composite(&self, composite: CompositeTool) -> AgentResult<()> {
        let payload = to_payload(&composite)?;
        self.lock()?
            .execute(
                "INSERT INTO composites(name, payload) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET payload = ?2",
                params![composite.name, payload],
            )
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_composite(&self, name: &str) -> AgentResult<Option<CompositeTool>> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM composites WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(store_err))
            .transpose()
    }

    async fn search_composites(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> AgentResult<Vec<CompositeMatch>> {
        let composites: Vec<CompositeTool> = self.load_all("composites")?;
        let candidates = composites
            .into_iter()
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
        self.load_all("composites")
    }
}

#[async_trait]
impl ExecutionLog for SqliteStore {
    async fn append(&self, record: ExecutionRecord) -> AgentResult<()> {
        let payload = to_payload(&record)?;
        self.lock()?
            .execute(
                "INSERT INTO executions(session_id, execution_order, payload) VALUES (?1, ?2, ?3)",
                params![record.session_id, record.execution_order as i64, payload],
            )
            .map_err(store_err)?;
        Ok(())
    }

    async fn session_records(&self, session_id: &str) -> AgentResult<Vec<ExecutionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT payload FROM executions WHERE session_id = ?1 ORDER BY execution_order",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))
            .map_err(store_err)?;
        let mut records = Vec::new();
        for row in rows {
            let payload = row.map_err(store_err)?;
            records.push(serde_json::from_str(&payload).map_err(store_err)?);
        }
        Ok(records)
    }

    async fn record_pair(
        &self,
        tool_a: &str,
        tool_b: &str,
        relationship_type: &str,
        success: bool,
    ) -> AgentResult<ToolRelationship> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;
        let existing: Option<(u64, f64)> = tx
            .query_row(
                "SELECT frequency, success_rate FROM relationships
                 WHERE tool_a = ?1 AND tool_b = ?2 AND relationship_type = ?3",
                params![tool_a, tool_b, relationship_type],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get(1)?)),
            )
            .optional()
            .map_err(store_err)?;

        let outcome = if success { 1.0 } else { 0.0 };
        let (frequency, success_rate) = match existing {
            Some((freq, rate)) => (
                freq + 1,
                WorkflowPattern::updated_rate(rate, freq, outcome),
            ),
            None => (1, outcome),
        };
        let confidence = ToolRelationship::confidence_for(frequency);
        tx.execute(
            "INSERT INTO relationships(tool_a, tool_b, relationship_type, frequency, success_rate, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(tool_a, tool_b, relationship_type)
             DO UPDATE SET frequency = ?4, success_rate = ?5, confidence = ?6",
            params![tool_a, tool_b, relationship_type, frequency as i64, success_rate, confidence],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)?;

        Ok(ToolRelationship {
            tool_a: tool_a.to_string(),
            tool_b: tool_b.to_string(),
            relationship_type: relationship_type.to_string(),
            frequency,
            success_rate,
            confidence,
        })
    }

    async fn relationships_for(
        &self,
        tool: &str,
        min_confidence: f64,
    ) -> AgentResult<Vec<ToolRelationship>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT tool_a, tool_b, relationship_type, frequency, success_rate, confidence
                 FROM relationships
                 WHERE (tool_a = ?1 OR tool_b = ?1) AND confidence >= ?2
                 ORDER BY confidence DESC",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![tool, min_confidence], |row| {
                Ok(ToolRelationship {
                    tool_a: row.get(0)?,
                    tool_b: row.get(1)?,
                    relationship_type: row.get(2)?,
                    frequency: row.get::<_, i64>(3)? as u64,
                    success_rate: row.get(4)?,
                    confidence: row.get(5)?,
                })
            })
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParamSpec, ToolSpec};

    fn spec(name: &str) -> ToolSpec {
        ToolSpec {
            function_name: name.into(),
            parameters: vec![ParamSpec {
                name: "s".into(),
                param_type: "str".into(),
                description: "input".into(),
            }],
            return_type: "str".into(),
            description: format!("{name} tool"),
        }
    }

    #[tokio::test]
    async fn tool_roundtrip_and_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("agent.db")).unwrap();

        let tool = ToolManifest::new(
            &spec("reverse_string"),
            "def reverse_string(s): return s[::-1]".into(),
            "def test_reverse(): pass".into(),
            vec![1.0, 0.0],
        );
        store.put_tool(tool.clone()).await.unwrap();

        let loaded = store.get_tool("reverse_string").await.unwrap().unwrap();
        assert_eq!(loaded, tool);

        // Upsert by name replaces, never duplicates.
        let repaired = tool.repaired("def reverse_string(s): return ''.join(reversed(s))".into(), "tests".into());
        store.put_tool(repaired.clone()).await.unwrap();
        assert_eq!(store.list_tools().await.unwrap().len(), 1);
        assert_eq!(
            store.get_tool("reverse_string").await.unwrap().unwrap().revision,
            1
        );
    }

    #[tokio::test]
    async fn relationship_upsert_is_transactional_and_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("agent.db")).unwrap();

        let first = store
            .record_pair("a", "b", "sequence", true)
            .await
            .unwrap();
        assert_eq!(first.frequency, 1);
        assert_eq!(first.success_rate, 1.0);

        let second = store
            .record_pair("a", "b", "sequence", false)
            .await
            .unwrap();
        assert_eq!(second.frequency, 2);
        assert!((second.success_rate - 0.5).abs() < 1e-9);
        assert!(second.confidence >= first.confidence);
    }

    #[tokio::test]
    async fn session_records_come_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("agent.db")).unwrap();

        for (order, name) in ["load_csv", "filter_rows"].iter().enumerate() {
            store
                .append(ExecutionRecord {
                    session_id: "s1".into(),
                    tool_name: name.to_string(),
                    execution_order: order,
                    inputs: Default::default(),
                    output: None,
                    error: None,
                    success: true,
                    duration_ms: 5,
                    user_prompt: "prompt".into(),
                    timestamp: chrono::Utc::now(),
                })
                .await
                .unwrap();
        }

        let records = store.session_records("s1").await.unwrap();
        let names: Vec<_> = records.iter().map(|r| r.tool_name.as_str()).collect();
        assert_eq!(names, vec!["load_csv", "filter_rows"]);
    }
}
