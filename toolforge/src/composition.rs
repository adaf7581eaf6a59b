//! Composition Planner: executes multi-step workflows.
//!
//! Each step resolves to a registered tool by similarity search, or triggers
//! synthesis for that step when nothing matches. A step's output is threaded
//! into the next step's argument-extraction context so later steps can refer
//! to earlier results. A step's unrecoverable failure fails the whole
//! workflow with the step index and cause — there are no partial commit
//! semantics, but the records of already-successful steps are handed back so
//! they still reach the execution log for pattern mining.

use std::sync::Arc;
use std::time::Instant;

use crate::errors::{AgentError, AgentResult};
use crate::events::{CancellationFlag, ProgressEvent, ProgressSink, ProgressStage, StageStatus};
use crate::executor::ToolExecutor;
use crate::oracle::{retry_once, GenerationOracle};
use crate::store::CapabilityStore;
use crate::synthesis::SynthesisPipeline;
use crate::types::{ArgMap, SubTask, ToolManifest};

pub struct CompositionPlanner {
    store: Arc<dyn CapabilityStore>,
    oracle: Arc<dyn GenerationOracle>,
    executor: Arc<ToolExecutor>,
    synthesis: Arc<SynthesisPipeline>,
    tool_threshold: f32,
}

/// What one step actually did; becomes an `ExecutionRecord` when the
/// orchestrator logs it.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub tool_name: String,
    pub task: String,
    pub args: ArgMap,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub struct WorkflowOutcome {
    pub results: Vec<serde_json::Value>,
    pub tool_sequence: Vec<String>,
    pub final_result: serde_json::Value,
    pub records: Vec<StepRecord>,
}

/// Failure carrying the records of the steps that did succeed, so they can
/// still be logged for mining.
#[derive(Debug)]
pub struct WorkflowFailure {
    pub step: usize,
    pub cause: AgentError,
    pub records: Vec<StepRecord>,
}

impl WorkflowFailure {
    pub fn into_error(self) -> AgentError {
        self.cause.at_step(self.step)
    }
}

impl CompositionPlanner {
    pub fn new(
        store: Arc<dyn CapabilityStore>,
        oracle: Arc<dyn GenerationOracle>,
        executor: Arc<ToolExecutor>,
        synthesis: Arc<SynthesisPipeline>,
        tool_threshold: f32,
    ) -> Self {
        Self {
            store,
            oracle,
            executor,
            synthesis,
            tool_threshold,
        }
    }

    pub async fn execute_workflow(
        &self,
        sub_tasks: &[SubTask],
        request: &str,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> Result<WorkflowOutcome, WorkflowFailure> {
        events.emit(ProgressEvent::new(
            ProgressStage::WorkflowStart,
            StageStatus::InProgress,
            serde_json::json!({
                "total_steps": sub_tasks.len(),
                "tasks": sub_tasks.iter().map(|t| t.task.clone()).collect::<Vec<_>>(),
                "request": request,
            }),
        ));

        let mut results: Vec<serde_json::Value> = Vec::new();
        let mut tool_sequence: Vec<String> = Vec::new();
        let mut records: Vec<StepRecord> = Vec::new();

        for (idx, sub_task) in sub_tasks.iter().enumerate() {
            let step = idx + 1;
            if let Err(cause) = cancel.checkpoint() {
                return Err(WorkflowFailure {
                    step,
                    cause,
                    records,
                });
            }
            events.emit(ProgressEvent::new(
                ProgressStage::WorkflowStep,
                StageStatus::InProgress,
                serde_json::json!({
                    "step": step,
                    "total": sub_tasks.len(),
                    "task": sub_task.task.clone(),
                    "depends_on": sub_task.depends_on,
                }),
            ));

            let tool = match self.resolve_step_tool(&sub_task.task, events, cancel).await {
                Ok(tool) => tool,
                Err(cause) => {
                    events.emit(ProgressEvent::failed(
                        ProgressStage::WorkflowStep,
                        &cause.to_string(),
                    ));
                    return Err(WorkflowFailure {
                        step,
                        cause,
                        records,
                    });
                }
            };

            // Thread the declared upstream result into extraction context.
            let previous = sub_task
                .depends_on
                .filter(|d| *d >= 1)
                .and_then(|d| results.get(d - 1));

            let started = Instant::now();
            match self
                .executor
                .execute_with_context(&tool, &sub_task.task, previous, events)
                .await
            {
                Ok(outcome) => {
                    records.push(StepRecord {
                        tool_name: tool.name.clone(),
                        task: sub_task.task.clone(),
                        args: outcome.args.clone(),
                        output: Some(outcome.value.clone()),
                        error: None,
                        success: true,
                        duration_ms: outcome.duration_ms,
                    });
                    events.emit(ProgressEvent::complete(
                        ProgressStage::WorkflowStep,
                        serde_json::json!({
                            "step": step,
                            "tool_name": tool.name.clone(),
                            "result": outcome.value.to_string(),
                        }),
                    ));
                    tool_sequence.push(tool.name);
                    results.push(outcome.value);
                }
                Err(cause) => {
                    let (args, message) = match &cause {
                        AgentError::RuntimeFailure { args, message, .. } => {
                            (args.clone(), message.clone())
                        }
                        other => (ArgMap::new(), other.to_string()),
                    };
                    records.push(StepRecord {
                        tool_name: tool.name.clone(),
                        task: sub_task.task.clone(),
                        args,
                        output: None,
                        error: Some(message),
                        success: false,
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                    events.emit(ProgressEvent::failed(
                        ProgressStage::WorkflowStep,
                        &cause.to_string(),
                    ));
                    return Err(WorkflowFailure {
                        step,
                        cause,
                        records,
                    });
                }
            }
        }

        events.emit(ProgressEvent::complete(
            ProgressStage::WorkflowComplete,
            serde_json::json!({
                "total_steps": sub_tasks.len(),
                "tool_sequence": tool_sequence.clone(),
            }),
        ));

        let final_result = results.last().cloned().unwrap_or(serde_json::Value::Null);
        Ok(WorkflowOutcome {
            results,
            tool_sequence,
            final_result,
            records,
        })
    }

    /// Execute a fixed, already-known tool sequence (a mined workflow
    /// pattern or a composite tool's component list). Each step after the
    /// first sees the previous step's output.
    pub async fn execute_sequence(
        &self,
        sequence: &[String],
        request: &str,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> Result<WorkflowOutcome, WorkflowFailure> {
        events.emit(ProgressEvent::new(
            ProgressStage::PatternExecution,
            StageStatus::InProgress,
            serde_json::json!({ "tool_sequence": sequence }),
        ));

        let mut results: Vec<serde_json::Value> = Vec::new();
        let mut records: Vec<StepRecord> = Vec::new();

        for (idx, name) in sequence.iter().enumerate() {
            let step = idx + 1;
            if let Err(cause) = cancel.checkpoint() {
                return Err(WorkflowFailure {
                    step,
                    cause,
                    records,
                });
            }

            let tool = match self.store.get_tool(name).await {
                Ok(Some(tool)) => tool,
                Ok(None) => {
                    return Err(WorkflowFailure {
                        step,
                        cause: AgentError::Store(format!(
                            "tool `{name}` from the stored sequence no longer exists"
                        )),
                        records,
                    })
                }
                Err(cause) => {
                    return Err(WorkflowFailure {
                        step,
                        cause,
                        records,
                    })
                }
            };

            let previous = results.last();
            let started = Instant::now();
            match self
                .executor
                .execute_with_context(&tool, request, previous, events)
                .await
            {
                Ok(outcome) => {
                    records.push(StepRecord {
                        tool_name: tool.name.clone(),
                        task: request.to_string(),
                        args: outcome.args.clone(),
                        output: Some(outcome.value.clone()),
                        error: None,
                        success: true,
                        duration_ms: outcome.duration_ms,
                    });
                    results.push(outcome.value);
                }
                Err(cause) => {
                    let (args, message) = match &cause {
                        AgentError::RuntimeFailure { args, message, .. } => {
                            (args.clone(), message.clone())
                        }
                        other => (ArgMap::new(), other.to_string()),
                    };
                    records.push(StepRecord {
                        tool_name: tool.name.clone(),
                        task: request.to_string(),
                        args,
                        output: None,
                        error: Some(message),
                        success: false,
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                    return Err(WorkflowFailure {
                        step,
                        cause,
                        records,
                    });
                }
            }
        }

        events.emit(ProgressEvent::complete(
            ProgressStage::PatternExecution,
            serde_json::json!({ "steps_completed": results.len() }),
        ));

        let final_result = results.last().cloned().unwrap_or(serde_json::Value::Null);
        Ok(WorkflowOutcome {
            results,
            tool_sequence: sequence.to_vec(),
            final_result,
            records,
        })
    }

    /// Find a tool for one step, synthesizing it when nothing in the store
    /// matches.
    async fn resolve_step_tool(
        &self,
        task: &str,
        events: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> AgentResult<ToolManifest> {
        match self.find_step_tool(task).await {
            Ok(tool) => Ok(tool),
            Err(AgentError::NoMatchingCapability) => {
                tracing::info!(task, "no tool for step, entering synthesis");
                events.emit(ProgressEvent::new(
                    ProgressStage::EnteringSynthesisMode,
                    StageStatus::InProgress,
                    serde_json::json!({ "task": task }),
                ));
                let outcome = self.synthesis.synthesize(task, events, cancel).await?;
                Ok(outcome.tool)
            }
            Err(e) => Err(e),
        }
    }

    async fn find_step_tool(&self, task: &str) -> AgentResult<ToolManifest> {
        let embedding = retry_once(|| self.oracle.embed(task)).await?;
        let matches = self
            .store
            .search_tools(&embedding, self.tool_threshold, 1)
            .await?;
        match matches.into_iter().next() {
            Some(m) => {
                tracing::debug!(tool = %m.tool.name, similarity = m.similarity, "step matched tool");
                Ok(m.tool)
            }
            None => Err(AgentError::NoMatchingCapability),
        }
    }
}
