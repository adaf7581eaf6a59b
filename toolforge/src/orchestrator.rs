//! Orchestrator: the composition root.
//!
//! Receives a request, asks the query planner for a strategy, dispatches to
//! the tool executor, composition planner, or synthesis pipeline, logs every
//! invocation to the workflow tracker exactly once, triggers mining and
//! composite promotion, and turns the raw result into a response. Within a
//! request everything is strictly sequential; concurrent requests coordinate
//! only through the external store.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::composition::{CompositionPlanner, StepRecord, WorkflowFailure};
use crate::config::AgentConfig;
use crate::errors::{AgentError, AgentResult};
use crate::events::{CancellationFlag, ProgressEvent, ProgressSink, ProgressStage, StageStatus};
use crate::executor::ToolExecutor;
use crate::oracle::{retry_once, GenerationOracle};
use crate::planner::{ExecutionPlan, QueryPlanner};
use crate::promotion::CompositePromoter;
use crate::responder::ResponseSynthesizer;
use crate::sandbox::ExecutionOracle;
use crate::session::{enrich_request, SessionContext};
use crate::store::{CapabilityStore, ExecutionLog};
use crate::synthesis::SynthesisPipeline;
use crate::tracker::WorkflowTracker;
use crate::types::ExecutionRecord;

const SESSION_CONTEXT_LIMIT: usize = 10;

pub struct Orchestrator {
    oracle: Arc<dyn GenerationOracle>,
    store: Arc<dyn CapabilityStore>,
    sessions: Arc<dyn SessionContext>,
    planner: QueryPlanner,
    executor: Arc<ToolExecutor>,
    synthesis: Arc<SynthesisPipeline>,
    composition: CompositionPlanner,
    tracker: WorkflowTracker,
    promoter: CompositePromoter,
    responder: ResponseSynthesizer,
    tool_threshold: f32,
}

/// Final answer for one request.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub success: bool,
    pub response: String,
    pub tool_name: Option<String>,
    pub result: Option<serde_json::Value>,
    /// Whether a new tool was synthesized while serving this request.
    pub synthesized: bool,
    pub strategy: String,
    pub error: Option<String>,
    pub session_id: String,
}

struct DispatchOutcome {
    result: serde_json::Value,
    tool_name: Option<String>,
    synthesized: bool,
    records_logged: usize,
}

impl Orchestrator {
    pub fn new(
        config: AgentConfig,
        oracle: Arc<dyn GenerationOracle>,
        sandbox: Arc<dyn ExecutionOracle>,
        store: Arc<dyn CapabilityStore>,
        log: Arc<dyn ExecutionLog>,
        sessions: Arc<dyn SessionContext>,
    ) -> Self {
        let executor = Arc::new(ToolExecutor::new(
            oracle.clone(),
            sandbox.clone(),
            &config.retry,
        ));
        let synthesis = Arc::new(SynthesisPipeline::new(
            oracle.clone(),
            sandbox,
            store.clone(),
            config.register_experimental(),
        ));
        let planner = QueryPlanner::new(oracle.clone(), store.clone(), config.similarity.clone());
        let composition = CompositionPlanner::new(
            store.clone(),
            oracle.clone(),
            executor.clone(),
            synthesis.clone(),
            config.similarity.tool_threshold(),
        );
        let tracker = WorkflowTracker::new(log, store.clone(), config.mining.clone());
        let promoter = CompositePromoter::new(store.clone(), config.promotion.clone());
        let responder = ResponseSynthesizer::new(oracle.clone());
        let tool_threshold = config.similarity.tool_threshold();
        Self {
            oracle,
            store,
            sessions,
            planner,
            executor,
            synthesis,
            composition,
            tracker,
            promoter,
            responder,
            tool_threshold,
        }
    }

    /// Process one request end to end: enrich, plan, dispatch, log, respond.
    pub async fn process_request(
        &self,
        request: &str,
        session_id: Option<&str>,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> AgentResponse {
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let enriched = match self
            .sessions
            .recent_messages(&session_id, SESSION_CONTEXT_LIMIT)
            .await
        {
            Ok(history) => enrich_request(request, &history),
            Err(e) => {
                tracing::warn!(error = %e, "session context unavailable, using bare request");
                request.to_string()
            }
        };
        if let Err(e) = self.sessions.append_message(&session_id, "user", request).await {
            tracing::warn!(error = %e, "failed to persist user turn");
        }

        let plan = self.planner.plan(&enriched).await;
        let strategy = plan.strategy().to_string();
        tracing::info!(%session_id, %strategy, "dispatching request");

        let dispatched = match cancel.checkpoint() {
            Ok(()) => self
                .dispatch(&plan, &enriched, &session_id, events, cancel)
                .await,
            Err(e) => Err(e),
        };

        match dispatched {
            Ok(outcome) => {
                if outcome.records_logged >= 2 {
                    self.mine_and_promote(&session_id, &enriched).await;
                }

                events.emit(ProgressEvent::in_progress(ProgressStage::SynthesizingResponse));
                let response = self.responder.respond(request, &outcome.result).await;
                events.emit(ProgressEvent::complete(
                    ProgressStage::Complete,
                    serde_json::json!({ "response": response.clone() }),
                ));
                if let Err(e) = self
                    .sessions
                    .append_message(&session_id, "assistant", &response)
                    .await
                {
                    tracing::warn!(error = %e, "failed to persist assistant turn");
                }
                AgentResponse {
                    success: true,
                    response,
                    tool_name: outcome.tool_name,
                    result: Some(outcome.result),
                    synthesized: outcome.synthesized,
                    strategy,
                    error: None,
                    session_id,
                }
            }
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "request failed");
                events.emit(ProgressEvent::failed(ProgressStage::Error, &e.to_string()));
                let response = self.responder.respond_error(request, &e.to_string()).await;
                if let Err(append_err) = self
                    .sessions
                    .append_message(&session_id, "assistant", &response)
                    .await
                {
                    tracing::warn!(error = %append_err, "failed to persist assistant turn");
                }
                AgentResponse {
                    success: false,
                    response,
                    tool_name: None,
                    result: None,
                    synthesized: false,
                    strategy,
                    error: Some(e.to_string()),
                    session_id,
                }
            }
        }
    }

    /// Mine the closed session into patterns and run composite promotion.
    /// Exposed for callers that scope sessions themselves; also invoked
    /// automatically after multi-tool requests.
    pub async fn end_session(&self, session_id: &str) {
        self.mine_and_promote(session_id, "").await;
    }

    pub fn tracker(&self) -> &WorkflowTracker {
        &self.tracker
    }

    async fn dispatch(
        &self,
        plan: &ExecutionPlan,
        request: &str,
        session_id: &str,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> AgentResult<DispatchOutcome> {
        match plan {
            ExecutionPlan::ForceSynthesis => {
                self.run_single(request, session_id, events, cancel, true)
                    .await
            }
            ExecutionPlan::Single => {
                self.run_single(request, session_id, events, cancel, false)
                    .await
            }
            ExecutionPlan::MultiToolComposition { sub_tasks } => {
                let run = self
                    .composition
                    .execute_workflow(sub_tasks, request, events, cancel)
                    .await;
                self.finish_workflow(run, request, session_id).await
            }
            ExecutionPlan::WorkflowPattern { pattern, .. } => {
                let run = self
                    .composition
                    .execute_sequence(&pattern.tool_sequence, request, events, cancel)
                    .await;
                self.finish_workflow(run, request, session_id).await
            }
            ExecutionPlan::CompositeTool { composite, .. } => {
                let run = self
                    .composition
                    .execute_sequence(&composite.component_tools, request, events, cancel)
                    .await;
                self.finish_workflow(run, request, session_id).await
            }
        }
    }

    /// Log a workflow's step records — successes and the failing step alike —
    /// then convert the run into a dispatch outcome or a terminal error.
    async fn finish_workflow(
        &self,
        run: Result<crate::composition::WorkflowOutcome, WorkflowFailure>,
        request: &str,
        session_id: &str,
    ) -> AgentResult<DispatchOutcome> {
        match run {
            Ok(outcome) => {
                let logged = self
                    .log_records(session_id, request, &outcome.records)
                    .await;
                Ok(DispatchOutcome {
                    result: outcome.final_result,
                    tool_name: outcome.tool_sequence.last().cloned(),
                    synthesized: false,
                    records_logged: logged,
                })
            }
            Err(failure) => {
                // Results are not visible to the caller, but the successful
                // intermediate records still feed pattern mining.
                self.log_records(session_id, request, &failure.records).await;
                Err(failure.into_error())
            }
        }
    }

    async fn run_single(
        &self,
        request: &str,
        session_id: &str,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
        force_synthesis: bool,
    ) -> AgentResult<DispatchOutcome> {
        if !force_synthesis {
            events.emit(ProgressEvent::new(
                ProgressStage::Searching,
                StageStatus::InProgress,
                serde_json::json!({ "query": request }),
            ));
            let embedding = retry_once(|| self.oracle.embed(request)).await?;
            let matches = self
                .store
                .search_tools(&embedding, self.tool_threshold, 1)
                .await?;

            if let Some(m) = matches.into_iter().next() {
                events.emit(ProgressEvent::complete(
                    ProgressStage::ToolFound,
                    serde_json::json!({ "tool_name": m.tool.name.clone(), "similarity": m.similarity }),
                ));
                match self.executor.execute(&m.tool, request, events).await {
                    Ok(outcome) => {
                        let record = StepRecord {
                            tool_name: m.tool.name.clone(),
                            task: request.to_string(),
                            args: outcome.args,
                            output: Some(outcome.value.clone()),
                            error: None,
                            success: true,
                            duration_ms: outcome.duration_ms,
                        };
                        let logged = self.log_records(session_id, request, &[record]).await;
                        return Ok(DispatchOutcome {
                            result: outcome.value,
                            tool_name: Some(m.tool.name),
                            synthesized: false,
                            records_logged: logged,
                        });
                    }
                    Err(AgentError::ArgumentExtractionFailed { tool, reason }) => {
                        // The matched tool does not fit the request; fall
                        // through to synthesizing one that does.
                        tracing::info!(%tool, %reason, "argument mismatch, invalidating match");
                        events.emit(ProgressEvent::warning(
                            ProgressStage::ToolMismatch,
                            serde_json::json!({ "tool_name": tool, "reason": reason }),
                        ));
                    }
                    Err(AgentError::RuntimeFailure {
                        tool: _,
                        message,
                        kind,
                        args,
                    }) => {
                        return self
                            .attempt_repair(&m.tool, request, session_id, message, kind, args, events, cancel)
                            .await;
                    }
                    Err(other) => return Err(other),
                }
            } else {
                events.emit(ProgressEvent::new(
                    ProgressStage::NoToolFound,
                    StageStatus::Complete,
                    serde_json::json!({ "query": request }),
                ));
            }
        }

        events.emit(ProgressEvent::in_progress(ProgressStage::EnteringSynthesisMode));
        let synthesized = match self.synthesis.synthesize(request, events, cancel).await {
            Ok(synthesized) => synthesized,
            Err(e) => {
                events.emit(ProgressEvent::failed(
                    ProgressStage::SynthesisFailed,
                    &e.to_string(),
                ));
                return Err(e);
            }
        };
        events.emit(ProgressEvent::complete(
            ProgressStage::SynthesisComplete,
            serde_json::json!({ "tool_name": synthesized.tool.name.clone() }),
        ));
        let outcome = self
            .executor
            .execute(&synthesized.tool, request, events)
            .await?;
        let record = StepRecord {
            tool_name: synthesized.tool.name.clone(),
            task: request.to_string(),
            args: outcome.args,
            output: Some(outcome.value.clone()),
            error: None,
            success: true,
            duration_ms: outcome.duration_ms,
        };
        let logged = self.log_records(session_id, request, &[record]).await;
        Ok(DispatchOutcome {
            result: outcome.value,
            tool_name: Some(synthesized.tool.name),
            synthesized: true,
            records_logged: logged,
        })
    }

    /// Single-pass self-repair for a registered tool that failed at runtime,
    /// followed by one re-execution of the repaired tool.
    #[allow(clippy::too_many_arguments)]
    async fn attempt_repair(
        &self,
        tool: &crate::types::ToolManifest,
        request: &str,
        session_id: &str,
        message: String,
        kind: crate::errors::FailureKind,
        args: crate::types::ArgMap,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> AgentResult<DispatchOutcome> {
        let failed_record = StepRecord {
            tool_name: tool.name.clone(),
            task: request.to_string(),
            args: args.clone(),
            output: None,
            error: Some(message.clone()),
            success: false,
            duration_ms: 0,
        };
        self.log_records(session_id, request, &[failed_record]).await;

        let repaired = match self
            .synthesis
            .repair(tool, &message, &args, events, cancel)
            .await
        {
            Ok(repaired) => repaired,
            Err(repair_err) => {
                tracing::warn!(tool = %tool.name, error = %repair_err, "self-repair failed");
                // Surface the original runtime failure; the repair attempt
                // was best-effort.
                return Err(AgentError::RuntimeFailure {
                    tool: tool.name.clone(),
                    message,
                    kind,
                    args,
                });
            }
        };

        let outcome = self.executor.execute(&repaired, request, events).await?;
        let record = StepRecord {
            tool_name: repaired.name.clone(),
            task: request.to_string(),
            args: outcome.args,
            output: Some(outcome.value.clone()),
            error: None,
            success: true,
            duration_ms: outcome.duration_ms,
        };
        let logged = self.log_records(session_id, request, &[record]).await;
        Ok(DispatchOutcome {
            result: outcome.value,
            tool_name: Some(repaired.name),
            synthesized: false,
            records_logged: logged,
        })
    }

    /// Centralized, exactly-once logging of execution records.
    async fn log_records(&self, session_id: &str, request: &str, records: &[StepRecord]) -> usize {
        let base_order = match self.tracker.session_history(session_id).await {
            Ok(existing) => existing.len(),
            Err(e) => {
                tracing::warn!(error = %e, "cannot read session history, starting order at 0");
                0
            }
        };
        let mut logged = 0;
        for (offset, step) in records.iter().enumerate() {
            let record = ExecutionRecord {
                session_id: session_id.to_string(),
                tool_name: step.tool_name.clone(),
                execution_order: base_order + offset,
                inputs: step.args.clone(),
                output: step.output.clone(),
                error: step.error.clone(),
                success: step.success,
                duration_ms: step.duration_ms,
                user_prompt: request.to_string(),
                timestamp: Utc::now(),
            };
            match self.tracker.record(record).await {
                Ok(()) => logged += 1,
                Err(e) => tracing::warn!(error = %e, "failed to log execution record"),
            }
        }
        logged
    }

    async fn mine_and_promote(&self, session_id: &str, request: &str) {
        let embedding = if request.is_empty() {
            None
        } else {
            self.oracle.embed(request).await.ok()
        };
        if let Err(e) = self
            .tracker
            .mine_session(session_id, embedding.as_deref())
            .await
        {
            tracing::warn!(error = %e, "pattern mining failed");
        }
        match self.promoter.promote_all().await {
            Ok(promoted) if !promoted.is_empty() => {
                tracing::info!(count = promoted.len(), "promoted composite tools");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "composite promotion failed"),
        }
    }
}
