//! Error taxonomy for the agent core.
//!
//! Recoverable conditions (malformed generation, a single verification
//! failure, an argument mismatch) are retried in place by the component that
//! hit them; anything exceeding its retry bound is surfaced as a terminal
//! error carrying the failing stage and cause. `NoMatchingCapability` is a
//! routing signal, not a failure.

use crate::types::ArgMap;
use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

/// Synthesis pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStage {
    Specification,
    Tests,
    Implementation,
    Verification,
    Registration,
}

impl SynthesisStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisStage::Specification => "specification",
            SynthesisStage::Tests => "tests",
            SynthesisStage::Implementation => "implementation",
            SynthesisStage::Verification => "verification",
            SynthesisStage::Registration => "registration",
        }
    }
}

impl std::fmt::Display for SynthesisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a tool runtime failure, derived from the error
/// text. Feeds self-repair context and execution records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ArgumentMismatch,
    TypeError,
    ValueError,
    Arithmetic,
    DataAccess,
    Timeout,
    Execution,
}

impl FailureKind {
    /// Classify an error message by keyword.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("missing") || lower.contains("required") {
            FailureKind::ArgumentMismatch
        } else if lower.contains("typeerror") || lower.contains("type ") {
            FailureKind::TypeError
        } else if lower.contains("valueerror") {
            FailureKind::ValueError
        } else if lower.contains("zerodivision") || lower.contains("division by zero") {
            FailureKind::Arithmetic
        } else if lower.contains("keyerror") || lower.contains("indexerror") || lower.contains("index out") {
            FailureKind::DataAccess
        } else if lower.contains("timeout") || lower.contains("timed out") {
            FailureKind::Timeout
        } else {
            FailureKind::Execution
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ArgumentMismatch => "argument_mismatch",
            FailureKind::TypeError => "type_error",
            FailureKind::ValueError => "value_error",
            FailureKind::Arithmetic => "arithmetic_error",
            FailureKind::DataAccess => "data_access_error",
            FailureKind::Timeout => "timeout",
            FailureKind::Execution => "execution_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    /// Transport failure or timeout talking to the generation or execution
    /// oracle. Retried once by the caller, then surfaced.
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// The oracle answered, but its output did not parse as the expected
    /// structure (code block, JSON spec, argument map).
    #[error("malformed oracle output: {0}")]
    MalformedGeneration(String),

    /// Generated code did not pass its test suite in the execution
    /// environment.
    #[error("verification failed: {output}")]
    VerificationFailed { output: String },

    /// The request does not contain the values a tool's signature needs.
    #[error("argument extraction failed for `{tool}`: {reason}")]
    ArgumentExtractionFailed { tool: String, reason: String },

    /// The tool executed but raised or returned an error. Distinguished from
    /// `VerificationFailed` because it can trigger self-repair.
    #[error("tool `{tool}` failed: {message}")]
    RuntimeFailure {
        tool: String,
        message: String,
        kind: FailureKind,
        args: ArgMap,
    },

    /// Routing signal: no registered tool matches the request. Callers enter
    /// synthesis instead of failing.
    #[error("no matching capability")]
    NoMatchingCapability,

    /// The synthesis pipeline gave up, carrying the stage at which it did.
    #[error("synthesis failed at {stage}: {cause}")]
    SynthesisFailed {
        stage: SynthesisStage,
        #[source]
        cause: Box<AgentError>,
    },

    /// A multi-step workflow failed; carries the 1-based step index.
    #[error("workflow step {step} failed: {cause}")]
    WorkflowFailed {
        step: usize,
        #[source]
        cause: Box<AgentError>,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

impl AgentError {
    /// Whether a single immediate retry of the failed call is warranted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::OracleUnavailable(_) | AgentError::MalformedGeneration(_)
        )
    }

    pub fn at_stage(self, stage: SynthesisStage) -> AgentError {
        AgentError::SynthesisFailed {
            stage,
            cause: Box::new(self),
        }
    }

    pub fn at_step(self, step: usize) -> AgentError {
        AgentError::WorkflowFailed {
            step,
            cause: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_division_by_zero_as_arithmetic() {
        assert_eq!(
            FailureKind::classify("ZeroDivisionError: division by zero"),
            FailureKind::Arithmetic
        );
    }

    #[test]
    fn classifies_missing_argument() {
        assert_eq!(
            FailureKind::classify("missing 1 required positional argument: 'price'"),
            FailureKind::ArgumentMismatch
        );
    }

    #[test]
    fn stage_wrapping_preserves_cause() {
        let err = AgentError::OracleUnavailable("connection refused".into())
            .at_stage(SynthesisStage::Tests);
        match err {
            AgentError::SynthesisFailed { stage, cause } => {
                assert_eq!(stage, SynthesisStage::Tests);
                assert!(matches!(*cause, AgentError::OracleUnavailable(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
