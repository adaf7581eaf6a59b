//! Tool Executor: turns a matched tool plus a natural-language request into
//! a result.
//!
//! Arguments are extracted by the generation oracle against the tool's
//! signature; a `null` value means the request lacks that parameter and is an
//! argument-extraction failure, not a runtime one. Runtime failures are
//! retried a bounded number of times, re-extracting arguments with the error
//! message appended as context — this recovers transient misparsing without
//! invoking full synthesis. Logging to the workflow tracker is the
//! orchestrator's job, so it happens exactly once per invocation.

use std::sync::Arc;
use std::time::Instant;

use crate::config::RetryConfig;
use crate::errors::{AgentError, AgentResult, FailureKind};
use crate::events::{ProgressEvent, ProgressSink, ProgressStage};
use crate::oracle::GenerationOracle;
use crate::sandbox::ExecutionOracle;
use crate::types::{ArgMap, ToolManifest};

pub struct ToolExecutor {
    oracle: Arc<dyn GenerationOracle>,
    runner: Arc<dyn ExecutionOracle>,
    max_retries: u32,
}

/// A successful invocation, with what it took to get there.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub value: serde_json::Value,
    pub args: ArgMap,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl ToolExecutor {
    pub fn new(
        oracle: Arc<dyn GenerationOracle>,
        runner: Arc<dyn ExecutionOracle>,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            oracle,
            runner,
            max_retries: retry.max_execution_retries(),
        }
    }

    pub async fn execute(
        &self,
        tool: &ToolManifest,
        request: &str,
        events: &dyn ProgressSink,
    ) -> AgentResult<ExecutionOutcome> {
        self.execute_with_context(tool, request, None, events).await
    }

    /// Execute with an optional upstream result threaded into the
    /// argument-extraction context, for multi-step workflows.
    pub async fn execute_with_context(
        &self,
        tool: &ToolManifest,
        request: &str,
        previous_result: Option<&serde_json::Value>,
        events: &dyn ProgressSink,
    ) -> AgentResult<ExecutionOutcome> {
        events.emit(ProgressEvent::new(
            ProgressStage::Executing,
            crate::events::StageStatus::InProgress,
            serde_json::json!({ "tool_name": tool.name.clone() }),
        ));

        let started = Instant::now();
        let mut last_error: Option<String> = None;
        let mut last_args = ArgMap::new();

        for attempt in 0..=self.max_retries {
            let feedback = build_feedback(previous_result, last_error.as_deref());
            let args = self
                .extract_args(tool, request, feedback.as_deref())
                .await?;
            last_args = args.clone();

            let output = self.runner.invoke(&tool.name, &tool.source, &args).await?;
            if output.success {
                let duration_ms = started.elapsed().as_millis() as u64;
                events.emit(ProgressEvent::complete(
                    ProgressStage::ExecutionComplete,
                    serde_json::json!({
                        "tool_name": tool.name.clone(),
                        "result": output.value.to_string(),
                    }),
                ));
                return Ok(ExecutionOutcome {
                    value: output.value,
                    args,
                    attempts: attempt + 1,
                    duration_ms,
                });
            }

            let message = output.error.unwrap_or_else(|| "unknown error".to_string());
            tracing::debug!(
                tool = %tool.name,
                attempt,
                error = %message,
                "tool invocation failed"
            );
            last_error = Some(message);
        }

        let message = last_error.unwrap_or_else(|| "unknown error".to_string());
        let kind = FailureKind::classify(&message);
        events.emit(ProgressEvent::failed(ProgressStage::ExecutionFailed, &message));
        Err(AgentError::RuntimeFailure {
            tool: tool.name.clone(),
            message,
            kind,
            args: last_args,
        })
    }

    /// Extract and validate arguments. One immediate retry on a transient
    /// oracle failure; `null` values surface as extraction failures.
    async fn extract_args(
        &self,
        tool: &ToolManifest,
        request: &str,
        feedback: Option<&str>,
    ) -> AgentResult<ArgMap> {
        let args = match self
            .oracle
            .extract_arguments(request, &tool.signature, feedback)
            .await
        {
            Ok(args) => args,
            Err(e) if e.is_retryable() => {
                tracing::debug!(tool = %tool.name, error = %e, "retrying argument extraction");
                self.oracle
                    .extract_arguments(request, &tool.signature, feedback)
                    .await?
            }
            Err(e) => return Err(e),
        };

        let missing: Vec<&String> = args
            .iter()
            .filter(|(_, v)| v.is_null())
            .map(|(k, _)| k)
            .collect();
        if !missing.is_empty() {
            return Err(AgentError::ArgumentExtractionFailed {
                tool: tool.name.clone(),
                reason: format!(
                    "the request is missing values for: {}",
                    missing
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            });
        }
        Ok(args)
    }
}

fn build_feedback(
    previous_result: Option<&serde_json::Value>,
    last_error: Option<&str>,
) -> Option<String> {
    match (previous_result, last_error) {
        (None, None) => None,
        (prev, err) => {
            let mut parts = Vec::new();
            if let Some(prev) = prev {
                parts.push(format!(
                    "The previous step produced this result, use it as an argument where the \
                     request refers to it: {prev}"
                ));
            }
            if let Some(err) = err {
                parts.push(format!("The last attempt failed with: {err}"));
            }
            Some(parts.join("\n"))
        }
    }
}
