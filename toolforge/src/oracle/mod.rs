//! Generation Oracle abstraction.
//!
//! The oracle is the external natural-language code-generation service. The
//! core talks to it through this trait so the orchestration logic stays
//! independent of any concrete provider; `HttpGenerationOracle` is the
//! production implementation against an OpenAI-compatible API.
//!
//! All calls are request/response with a bounded wait. Failures are typed as
//! `OracleUnavailable` (transport/timeout) vs `MalformedGeneration` (the
//! output did not parse as the expected structure); callers retry each once
//! before surfacing.

pub mod http;

pub use http::HttpGenerationOracle;

use crate::errors::AgentResult;
use crate::types::{ArgMap, SubTask, ToolSpec};
use async_trait::async_trait;

/// Dimensionality of the embedding vectors the oracle produces.
pub const EMBEDDING_DIM: usize = 1536;

#[async_trait]
pub trait GenerationOracle: Send + Sync {
    /// Turn a request into a structured function specification.
    async fn generate_spec(&self, request: &str) -> AgentResult<ToolSpec>;

    /// Produce a test suite for a specification: at least one normal case
    /// plus boundary cases implied by the parameter types.
    async fn generate_tests(&self, spec: &ToolSpec) -> AgentResult<String>;

    /// Produce an implementation intended to satisfy the tests. `feedback`
    /// carries failing test output (regeneration) or a triggering runtime
    /// error (self-repair).
    async fn generate_implementation(
        &self,
        spec: &ToolSpec,
        tests: &str,
        feedback: Option<&str>,
    ) -> AgentResult<String>;

    /// Produce one minimal regression test reproducing a runtime failure.
    async fn generate_regression_test(
        &self,
        source: &str,
        error: &str,
        inputs: &ArgMap,
    ) -> AgentResult<String>;

    /// Break a request into an ordered list of sub-tasks. A single-element
    /// result means the request is one operation.
    async fn decompose(&self, request: &str) -> AgentResult<Vec<SubTask>>;

    /// Extract call arguments from a request, guided by a signature. A
    /// `null` value means the request does not contain that parameter.
    /// `feedback` carries a prior execution error for retry context.
    async fn extract_arguments(
        &self,
        request: &str,
        signature: &str,
        feedback: Option<&str>,
    ) -> AgentResult<ArgMap>;

    /// Embed text for similarity search.
    async fn embed(&self, text: &str) -> AgentResult<Vec<f32>>;

    /// Turn (request, result) into a conversational reply.
    async fn summarize(&self, request: &str, result: &serde_json::Value) -> AgentResult<String>;
}

/// Run an oracle call, retrying exactly once when the failure is transient
/// (unavailable) or a regeneration is warranted (malformed output). Anything
/// past that single retry surfaces to the caller.
pub async fn retry_once<T, F, Fut>(op: F) -> AgentResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = AgentResult<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(e) if e.is_retryable() => {
            tracing::debug!(error = %e, "retrying oracle call once");
            op().await
        }
        Err(e) => Err(e),
    }
}
