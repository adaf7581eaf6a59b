//! Progress events surfaced to the caller-facing layer.
//!
//! Events are emitted synchronously at stage boundaries as an ordered,
//! at-least-once stream of `(stage, status, payload)` tuples. A retried stage
//! re-emits its events rather than silently skipping, so consumers always see
//! the stage ordering the pipeline actually took.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Stages observable from the outside. Synthesis stages appear here next to
/// orchestration-level ones; both flow through the same sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Searching,
    NoToolFound,
    ToolFound,
    ToolMismatch,
    EnteringSynthesisMode,
    Specification,
    Tests,
    Implementation,
    Verification,
    Registration,
    SynthesisComplete,
    SynthesisFailed,
    Executing,
    ExecutionComplete,
    ExecutionFailed,
    SelfRepair,
    WorkflowStart,
    WorkflowStep,
    WorkflowComplete,
    PatternExecution,
    SynthesizingResponse,
    Complete,
    Error,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Searching => "searching",
            ProgressStage::NoToolFound => "no_tool_found",
            ProgressStage::ToolFound => "tool_found",
            ProgressStage::ToolMismatch => "tool_mismatch",
            ProgressStage::EnteringSynthesisMode => "entering_synthesis_mode",
            ProgressStage::Specification => "specification",
            ProgressStage::Tests => "tests",
            ProgressStage::Implementation => "implementation",
            ProgressStage::Verification => "verification",
            ProgressStage::Registration => "registration",
            ProgressStage::SynthesisComplete => "synthesis_complete",
            ProgressStage::SynthesisFailed => "synthesis_failed",
            ProgressStage::Executing => "executing",
            ProgressStage::ExecutionComplete => "execution_complete",
            ProgressStage::ExecutionFailed => "execution_failed",
            ProgressStage::SelfRepair => "self_repair",
            ProgressStage::WorkflowStart => "workflow_start",
            ProgressStage::WorkflowStep => "workflow_step",
            ProgressStage::WorkflowComplete => "workflow_complete",
            ProgressStage::PatternExecution => "pattern_execution",
            ProgressStage::SynthesizingResponse => "synthesizing_response",
            ProgressStage::Complete => "complete",
            ProgressStage::Error => "error",
        }
    }
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    InProgress,
    Complete,
    Failed,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub status: StageStatus,
    pub payload: serde_json::Value,
}

impl ProgressEvent {
    pub fn new(stage: ProgressStage, status: StageStatus, payload: serde_json::Value) -> Self {
        Self {
            stage,
            status,
            payload,
        }
    }

    pub fn in_progress(stage: ProgressStage) -> Self {
        Self::new(stage, StageStatus::InProgress, serde_json::Value::Null)
    }

    pub fn complete(stage: ProgressStage, payload: serde_json::Value) -> Self {
        Self::new(stage, StageStatus::Complete, payload)
    }

    pub fn failed(stage: ProgressStage, error: &str) -> Self {
        Self::new(
            stage,
            StageStatus::Failed,
            serde_json::json!({ "error": error }),
        )
    }

    pub fn warning(stage: ProgressStage, payload: serde_json::Value) -> Self {
        Self::new(stage, StageStatus::Warning, payload)
    }
}

/// Sink for progress events, implemented by the presentation layer.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that drops everything; for callers that do not care about progress.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Sink that forwards events to the tracing subscriber.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: ProgressEvent) {
        match event.status {
            StageStatus::Failed => {
                tracing::warn!(stage = %event.stage, payload = %event.payload, "stage failed")
            }
            _ => tracing::debug!(stage = %event.stage, status = ?event.status, "progress"),
        }
    }
}

/// In-memory collecting sink. Test-friendly, mirrors the ordering guarantee.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<ProgressEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Stage names in emission order, for asserting stage ordering.
    pub fn stages(&self) -> Vec<(ProgressStage, StageStatus)> {
        self.events()
            .iter()
            .map(|e| (e.stage, e.status))
            .collect()
    }

    pub fn count(&self, stage: ProgressStage) -> usize {
        self.events().iter().filter(|e| e.stage == stage).count()
    }
}

impl ProgressSink for EventLog {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Caller-initiated cancellation, honored at the next stage boundary. An
/// in-flight oracle call is not interrupted, but no further stage runs.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(std::sync::Arc<std::sync::atomic::AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Error out at a stage boundary if cancellation was requested.
    pub fn checkpoint(&self) -> crate::errors::AgentResult<()> {
        if self.is_cancelled() {
            Err(crate::errors::AgentError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_log_preserves_order() {
        let log = EventLog::new();
        log.emit(ProgressEvent::in_progress(ProgressStage::Specification));
        log.emit(ProgressEvent::complete(
            ProgressStage::Specification,
            serde_json::Value::Null,
        ));
        log.emit(ProgressEvent::in_progress(ProgressStage::Tests));
        let stages = log.stages();
        assert_eq!(
            stages,
            vec![
                (ProgressStage::Specification, StageStatus::InProgress),
                (ProgressStage::Specification, StageStatus::Complete),
                (ProgressStage::Tests, StageStatus::InProgress),
            ]
        );
    }

    #[test]
    fn cancellation_checkpoint_errors_after_cancel() {
        let flag = CancellationFlag::new();
        assert!(flag.checkpoint().is_ok());
        flag.cancel();
        assert!(matches!(
            flag.checkpoint(),
            Err(crate::errors::AgentError::Cancelled)
        ));
    }
}
