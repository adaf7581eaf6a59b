//! Execution Oracle abstraction.
//!
//! The isolated environment that runs generated code: verification executes
//! an implementation against its test suite, invocation calls a registered
//! tool with extracted arguments. Both run with no network access, a capped
//! wall-clock timeout, capped memory and CPU, non-root, and an environment
//! that is destroyed after each call — nothing leaks between runs.

pub mod container;

pub use container::ContainerSandbox;

use crate::errors::AgentResult;
use crate::types::{ArgMap, InvokeOutput, VerificationReport};
use async_trait::async_trait;

#[async_trait]
pub trait ExecutionOracle: Send + Sync {
    /// Run `source` against `tests`; pass/fail plus captured output. A hang
    /// or resource blowout counts as a failure, not an adapter error.
    /// `data_files` are (name, contents) fixtures staged next to the code,
    /// for tools that operate on uploaded data.
    async fn verify(
        &self,
        name: &str,
        source: &str,
        tests: &str,
        data_files: &[(String, String)],
    ) -> AgentResult<VerificationReport>;

    /// Call the named function in `source` with `args` under the same
    /// isolation contract.
    async fn invoke(&self, name: &str, source: &str, args: &ArgMap) -> AgentResult<InvokeOutput>;
}
