//! Core data model shared across the agent subsystems.
//!
//! All cross-component communication is by value; no component holds a
//! mutable reference to another's state. The capability store is the sole
//! writer of tool/pattern/composite records, the workflow tracker the sole
//! writer of execution records and relationships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Argument map extracted from a natural-language request, keyed by
/// parameter name.
pub type ArgMap = serde_json::Map<String, serde_json::Value>;

/// One typed parameter of a tool signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
}

/// Structured function specification produced by the generation oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub function_name: String,
    pub parameters: Vec<ParamSpec>,
    pub return_type: String,
    /// Descriptive documentation; also the text that gets embedded for
    /// similarity search.
    pub description: String,
}

impl ToolSpec {
    /// Render the signature the way the argument-extraction prompt expects it.
    pub fn signature(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.name, p.param_type))
            .collect::<Vec<_>>()
            .join(", ");
        format!("def {}({}) -> {}", self.function_name, params, self.return_type)
    }
}

/// One step of a decomposed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub task: String,
    pub order: usize,
    /// 1-based index of the step whose output this step consumes, if any.
    #[serde(default)]
    pub depends_on: Option<usize>,
}

/// Trust status assigned at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Tests passed in the execution environment at registration.
    Verified,
    /// Registered despite a test failure; never silently treated as
    /// trustworthy.
    Experimental,
}

/// Cumulative invocation statistics, updated by the orchestrator after each
/// run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub invocations: u64,
    pub failures: u64,
}

/// A registered capability: name-keyed, versionless, paired with its tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    /// Unique within the store; doubles as the store key.
    pub name: String,
    pub display_name: String,
    pub source: String,
    pub tests: String,
    pub description: String,
    /// Rendered signature, kept so argument extraction does not have to
    /// re-parse the source.
    pub signature: String,
    /// The structured spec the tool was synthesized from; reused verbatim by
    /// self-repair.
    pub spec: ToolSpec,
    pub status: ToolStatus,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// SHA-256 of the current source; changes on self-repair.
    pub content_hash: String,
    /// Bumped by each successful self-repair; identity never changes.
    pub revision: u32,
    #[serde(default)]
    pub usage: UsageStats,
}

impl ToolManifest {
    pub fn new(spec: &ToolSpec, source: String, tests: String, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        let content_hash = content_hash(&source);
        Self {
            name: spec.function_name.clone(),
            display_name: spec.function_name.replace('_', " "),
            signature: spec.signature(),
            description: spec.description.clone(),
            spec: spec.clone(),
            source,
            tests,
            status: ToolStatus::Verified,
            embedding,
            created_at: now,
            updated_at: now,
            content_hash,
            revision: 0,
            usage: UsageStats::default(),
        }
    }

    /// Replace source and tests in place, preserving identity. Used only by
    /// self-repair.
    pub fn repaired(mut self, source: String, tests: String) -> Self {
        self.content_hash = content_hash(&source);
        self.source = source;
        self.tests = tests;
        self.status = ToolStatus::Verified;
        self.revision += 1;
        self.updated_at = Utc::now();
        self
    }
}

pub fn content_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One logged tool invocation. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub session_id: String,
    pub tool_name: String,
    /// Ordinal position within the session, starting at 0.
    pub execution_order: usize,
    pub inputs: ArgMap,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
    pub user_prompt: String,
    pub timestamp: DateTime<Utc>,
}

/// Pairwise edge between tools that co-occurred in a workflow. Confidence is
/// derived purely from frequency (evidence volume); quality is read
/// separately via the success rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRelationship {
    pub tool_a: String,
    pub tool_b: String,
    pub relationship_type: String,
    pub frequency: u64,
    pub success_rate: f64,
    pub confidence: f64,
}

impl ToolRelationship {
    /// Confidence caps at 1.0 after ten observations.
    pub fn confidence_for(frequency: u64) -> f64 {
        (frequency as f64 / 10.0).min(1.0)
    }
}

/// An ordered tool sequence observed to co-occur across sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPattern {
    pub pattern_name: String,
    pub tool_sequence: Vec<String>,
    pub frequency: u64,
    pub success_rate: f64,
    pub embedding: Vec<f32>,
    pub sessions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl WorkflowPattern {
    pub fn sequence_key(sequence: &[String]) -> String {
        sequence.join(" -> ")
    }

    /// Running-average update: `(old_rate * old_freq + outcome) / (old_freq + 1)`.
    pub fn updated_rate(old_rate: f64, old_freq: u64, outcome: f64) -> f64 {
        (old_rate * old_freq as f64 + outcome) / (old_freq as f64 + 1.0)
    }
}

/// A promoted workflow: a tool whose body is a fixed call-graph over
/// component tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeTool {
    pub name: String,
    pub description: String,
    pub component_tools: Vec<String>,
    pub embedding: Vec<f32>,
    pub success_rate: f64,
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
    /// Sequence key of the pattern this composite was promoted from.
    pub source_pattern: String,
}

/// One prior conversational turn, provided by the caller-facing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: String,
    pub content: String,
    pub message_index: usize,
}

/// Outcome of running an implementation against its test suite in the
/// isolated environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub passed: bool,
    pub output: String,
}

/// Outcome of invoking a tool with extracted arguments in the isolated
/// environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeOutput {
    pub success: bool,
    pub value: serde_json::Value,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ToolSpec {
        ToolSpec {
            function_name: "calculate_percentage".into(),
            parameters: vec![
                ParamSpec {
                    name: "base".into(),
                    param_type: "float".into(),
                    description: "base number".into(),
                },
                ParamSpec {
                    name: "percentage".into(),
                    param_type: "float".into(),
                    description: "percentage to take".into(),
                },
            ],
            return_type: "float".into(),
            description: "Calculates a percentage of a base number".into(),
        }
    }

    #[test]
    fn signature_renders_all_parameters() {
        assert_eq!(
            spec().signature(),
            "def calculate_percentage(base: float, percentage: float) -> float"
        );
    }

    #[test]
    fn repair_preserves_identity_and_bumps_revision() {
        let tool = ToolManifest::new(&spec(), "def f(): pass".into(), "def test_f(): pass".into(), vec![1.0]);
        let original_hash = tool.content_hash.clone();
        let repaired = tool.clone().repaired("def f(): return 0".into(), "def test_f(): pass".into());
        assert_eq!(repaired.name, tool.name);
        assert_eq!(repaired.created_at, tool.created_at);
        assert_eq!(repaired.revision, 1);
        assert_ne!(repaired.content_hash, original_hash);
    }

    #[test]
    fn confidence_caps_at_one() {
        assert_eq!(ToolRelationship::confidence_for(3), 0.3);
        assert_eq!(ToolRelationship::confidence_for(10), 1.0);
        assert_eq!(ToolRelationship::confidence_for(25), 1.0);
    }

    #[test]
    fn running_average_matches_incremental_mean() {
        let mut rate = 0.0;
        let mut freq = 0;
        for outcome in [1.0, 1.0, 0.0, 1.0] {
            rate = WorkflowPattern::updated_rate(rate, freq, outcome);
            freq += 1;
        }
        assert!((rate - 0.75).abs() < 1e-9);
    }
}
