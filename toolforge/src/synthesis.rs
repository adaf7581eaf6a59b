//! Synthesis Pipeline: the test-first state machine that creates new tools.
//!
//! Stages run in strict forward order, each gated on the previous one:
//! specification → tests → implementation → verification → registration.
//! A verification failure buys exactly one implementation regeneration with
//! the failing output as feedback; a second failure registers the tool as
//! experimental (when allowed) or fails the pipeline. Self-repair re-enters
//! at the implementation stage for an already-registered tool, reusing its
//! spec and tests plus one fresh regression test, and replaces source and
//! tests in place on success — identity never changes.

use std::sync::Arc;

use crate::errors::{AgentError, AgentResult, FailureKind, SynthesisStage};
use crate::events::{CancellationFlag, ProgressEvent, ProgressSink, ProgressStage, StageStatus};
use crate::oracle::{retry_once, GenerationOracle};
use crate::sandbox::ExecutionOracle;
use crate::store::CapabilityStore;
use crate::types::{ArgMap, ToolManifest, ToolSpec, ToolStatus, VerificationReport};

pub struct SynthesisPipeline {
    oracle: Arc<dyn GenerationOracle>,
    sandbox: Arc<dyn ExecutionOracle>,
    store: Arc<dyn CapabilityStore>,
    register_experimental: bool,
}

#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub tool: ToolManifest,
    /// False when the tool was registered experimental.
    pub verified: bool,
}

impl SynthesisPipeline {
    pub fn new(
        oracle: Arc<dyn GenerationOracle>,
        sandbox: Arc<dyn ExecutionOracle>,
        store: Arc<dyn CapabilityStore>,
        register_experimental: bool,
    ) -> Self {
        Self {
            oracle,
            sandbox,
            store,
            register_experimental,
        }
    }

    /// Drive the full pipeline for a request. Cancellation is honored at
    /// each stage boundary; an in-flight oracle call is never interrupted.
    pub async fn synthesize(
        &self,
        request: &str,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> AgentResult<SynthesisOutcome> {
        let spec = self.run_specification(request, events, cancel).await?;
        let tests = self.run_tests(&spec, events, cancel).await?;
        let (source, verified, report) = self
            .run_implementation_and_verification(&spec, &tests, events, cancel)
            .await?;
        self.run_registration(&spec, source, tests, verified, report, events, cancel)
            .await
    }

    async fn run_specification(
        &self,
        request: &str,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> AgentResult<ToolSpec> {
        cancel.checkpoint()?;
        events.emit(ProgressEvent::in_progress(ProgressStage::Specification));
        let spec = retry_once(|| self.oracle.generate_spec(request))
            .await
            .map_err(|e| {
                events.emit(ProgressEvent::failed(
                    ProgressStage::Specification,
                    &e.to_string(),
                ));
                e.at_stage(SynthesisStage::Specification)
            })?;
        events.emit(ProgressEvent::complete(
            ProgressStage::Specification,
            serde_json::json!({ "function_name": spec.function_name.clone() }),
        ));
        Ok(spec)
    }

    async fn run_tests(
        &self,
        spec: &ToolSpec,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> AgentResult<String> {
        cancel.checkpoint()?;
        events.emit(ProgressEvent::in_progress(ProgressStage::Tests));
        let tests = retry_once(|| self.oracle.generate_tests(spec))
            .await
            .map_err(|e| {
                events.emit(ProgressEvent::failed(ProgressStage::Tests, &e.to_string()));
                e.at_stage(SynthesisStage::Tests)
            })?;
        events.emit(ProgressEvent::complete(
            ProgressStage::Tests,
            serde_json::json!({ "test_count": tests.matches("def test_").count() }),
        ));
        Ok(tests)
    }

    /// Implementation and verification, including the single
    /// regenerate-and-reverify pass on a failing first verification. The
    /// retried stages re-emit their events so consumers see the real order.
    async fn run_implementation_and_verification(
        &self,
        spec: &ToolSpec,
        tests: &str,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> AgentResult<(String, bool, VerificationReport)> {
        let mut feedback: Option<String> = None;
        let mut last: Option<(String, VerificationReport)> = None;

        // First attempt plus at most one regeneration.
        for attempt in 0..2 {
            cancel.checkpoint()?;
            events.emit(ProgressEvent::in_progress(ProgressStage::Implementation));
            let source = retry_once(|| {
                self.oracle
                    .generate_implementation(spec, tests, feedback.as_deref())
            })
            .await
            .map_err(|e| {
                events.emit(ProgressEvent::failed(
                    ProgressStage::Implementation,
                    &e.to_string(),
                ));
                e.at_stage(SynthesisStage::Implementation)
            })?;
            events.emit(ProgressEvent::complete(
                ProgressStage::Implementation,
                serde_json::json!({ "function_name": spec.function_name.clone(), "attempt": attempt + 1 }),
            ));

            cancel.checkpoint()?;
            events.emit(ProgressEvent::in_progress(ProgressStage::Verification));
            let report = self
                .sandbox
                .verify(&spec.function_name, &source, tests, &[])
                .await
                .map_err(|e| {
                    events.emit(ProgressEvent::failed(
                        ProgressStage::Verification,
                        &e.to_string(),
                    ));
                    e.at_stage(SynthesisStage::Verification)
                })?;

            if report.passed {
                events.emit(ProgressEvent::complete(
                    ProgressStage::Verification,
                    serde_json::json!({ "tests_passed": true }),
                ));
                return Ok((source, true, report));
            }

            tracing::warn!(
                tool = %spec.function_name,
                attempt,
                "generated implementation failed verification"
            );
            events.emit(ProgressEvent::warning(
                ProgressStage::Verification,
                serde_json::json!({ "tests_passed": false, "output": report.output.clone() }),
            ));
            feedback = Some(report.output.clone());
            last = Some((source, report));
        }

        // Both attempts failed; the registration stage decides between
        // experimental registration and surfacing the failure.
        let (source, report) = match last {
            Some(pair) => pair,
            None => {
                return Err(AgentError::Internal(
                    "verification loop finished without a report".into(),
                ))
            }
        };
        events.emit(ProgressEvent::failed(
            ProgressStage::Verification,
            "tests failed after regeneration",
        ));
        Ok((source, false, report))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_registration(
        &self,
        spec: &ToolSpec,
        source: String,
        tests: String,
        verified: bool,
        report: VerificationReport,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> AgentResult<SynthesisOutcome> {
        if !verified && !self.register_experimental {
            return Err(AgentError::VerificationFailed {
                output: report.output,
            }
            .at_stage(SynthesisStage::Verification));
        }

        cancel.checkpoint()?;
        events.emit(ProgressEvent::in_progress(ProgressStage::Registration));
        let embedding = retry_once(|| self.oracle.embed(&spec.description))
            .await
            .map_err(|e| {
                events.emit(ProgressEvent::failed(
                    ProgressStage::Registration,
                    &e.to_string(),
                ));
                e.at_stage(SynthesisStage::Registration)
            })?;

        let mut tool = ToolManifest::new(spec, source, tests, embedding);
        if !verified {
            tool.status = ToolStatus::Experimental;
            events.emit(ProgressEvent::warning(
                ProgressStage::Registration,
                serde_json::json!({
                    "tool_name": tool.name.clone(),
                    "status": "experimental",
                    "output": report.output,
                }),
            ));
        }

        self.store.put_tool(tool.clone()).await.map_err(|e| {
            events.emit(ProgressEvent::failed(
                ProgressStage::Registration,
                &e.to_string(),
            ));
            e.at_stage(SynthesisStage::Registration)
        })?;

        events.emit(ProgressEvent::complete(
            ProgressStage::Registration,
            serde_json::json!({ "tool_name": tool.name.clone(), "verified": verified }),
        ));
        Ok(SynthesisOutcome { tool, verified })
    }

    /// Single-pass self-repair of a registered tool that failed at runtime.
    /// Regenerates only the implementation, appends one regression test, and
    /// re-verifies once. Never loops.
    pub async fn repair(
        &self,
        tool: &ToolManifest,
        error: &str,
        failing_args: &ArgMap,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> AgentResult<ToolManifest> {
        let kind = FailureKind::classify(error);
        events.emit(ProgressEvent::new(
            ProgressStage::SelfRepair,
            StageStatus::InProgress,
            serde_json::json!({ "tool_name": tool.name.clone(), "failure_kind": kind.as_str() }),
        ));

        cancel.checkpoint()?;
        let regression = retry_once(|| {
            self.oracle
                .generate_regression_test(&tool.source, error, failing_args)
        })
        .await
        .map_err(|e| e.at_stage(SynthesisStage::Tests))?;
        let combined_tests = format!(
            "{}\n\n# Regression test for reported failure\n{}",
            tool.tests, regression
        );

        cancel.checkpoint()?;
        events.emit(ProgressEvent::in_progress(ProgressStage::Implementation));
        let feedback = format!(
            "The registered implementation failed at runtime.\nInputs: {}\nError: {error}\n\
             Fix the specific issue while keeping all existing behavior.",
            serde_json::Value::Object(failing_args.clone())
        );
        let source = retry_once(|| {
            self.oracle
                .generate_implementation(&tool.spec, &combined_tests, Some(&feedback))
        })
        .await
        .map_err(|e| {
            events.emit(ProgressEvent::failed(
                ProgressStage::Implementation,
                &e.to_string(),
            ));
            e.at_stage(SynthesisStage::Implementation)
        })?;
        events.emit(ProgressEvent::complete(
            ProgressStage::Implementation,
            serde_json::json!({ "function_name": tool.name.clone(), "repair": true }),
        ));

        cancel.checkpoint()?;
        events.emit(ProgressEvent::in_progress(ProgressStage::Verification));
        let report = self
            .sandbox
            .verify(&tool.name, &source, &combined_tests, &[])
            .await
            .map_err(|e| e.at_stage(SynthesisStage::Verification))?;
        if !report.passed {
            events.emit(ProgressEvent::failed(
                ProgressStage::Verification,
                "repaired implementation still fails its tests",
            ));
            events.emit(ProgressEvent::failed(ProgressStage::SelfRepair, error));
            return Err(AgentError::VerificationFailed {
                output: report.output,
            }
            .at_stage(SynthesisStage::Verification));
        }
        events.emit(ProgressEvent::complete(
            ProgressStage::Verification,
            serde_json::json!({ "tests_passed": true }),
        ));

        cancel.checkpoint()?;
        events.emit(ProgressEvent::in_progress(ProgressStage::Registration));
        let repaired = tool.clone().repaired(source, combined_tests);
        self.store
            .put_tool(repaired.clone())
            .await
            .map_err(|e| e.at_stage(SynthesisStage::Registration))?;
        events.emit(ProgressEvent::complete(
            ProgressStage::Registration,
            serde_json::json!({ "tool_name": repaired.name.clone(), "revision": repaired.revision }),
        ));
        events.emit(ProgressEvent::complete(
            ProgressStage::SelfRepair,
            serde_json::json!({ "tool_name": repaired.name.clone() }),
        ));
        Ok(repaired)
    }
}
