//! Query Planner: classifies a request into an execution strategy.
//!
//! Decision order, first match wins: explicit creation directive, composite
//! tool match, workflow pattern match, multi-step decomposition, single-tool
//! default. Planning is best-effort by construction — an unreachable oracle
//! or store degrades the plan to `Single` rather than failing the request.

use std::sync::Arc;

use crate::config::SimilarityConfig;
use crate::oracle::{retry_once, GenerationOracle};
use crate::store::CapabilityStore;
use crate::types::{CompositeTool, SubTask, WorkflowPattern};

#[derive(Debug, Clone)]
pub enum ExecutionPlan {
    /// The request explicitly asks for a new tool; search is bypassed.
    ForceSynthesis,
    CompositeTool {
        composite: CompositeTool,
        similarity: f32,
    },
    WorkflowPattern {
        pattern: WorkflowPattern,
        similarity: f32,
    },
    MultiToolComposition { sub_tasks: Vec<SubTask> },
    Single,
}

impl ExecutionPlan {
    pub fn strategy(&self) -> &'static str {
        match self {
            ExecutionPlan::ForceSynthesis => "force_synthesis",
            ExecutionPlan::CompositeTool { .. } => "composite_tool",
            ExecutionPlan::WorkflowPattern { .. } => "workflow_pattern",
            ExecutionPlan::MultiToolComposition { .. } => "multi_tool_composition",
            ExecutionPlan::Single => "single",
        }
    }
}

const CREATION_DIRECTIVES: &[&str] = &[
    "create a new function",
    "create a function",
    "create a new tool",
    "create a tool",
    "make a tool",
    "make a function",
    "write a function",
    "build a tool",
];

pub struct QueryPlanner {
    oracle: Arc<dyn GenerationOracle>,
    store: Arc<dyn CapabilityStore>,
    similarity: SimilarityConfig,
}

impl QueryPlanner {
    pub fn new(
        oracle: Arc<dyn GenerationOracle>,
        store: Arc<dyn CapabilityStore>,
        similarity: SimilarityConfig,
    ) -> Self {
        Self {
            oracle,
            store,
            similarity,
        }
    }

    pub async fn plan(&self, request: &str) -> ExecutionPlan {
        if is_creation_directive(request) {
            tracing::debug!("explicit creation directive, forcing synthesis");
            return ExecutionPlan::ForceSynthesis;
        }

        let embedding = match retry_once(|| self.oracle.embed(request)).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                tracing::warn!(error = %e, "embedding unavailable, skipping similarity planning");
                None
            }
        };

        if let Some(embedding) = &embedding {
            match self
                .store
                .search_composites(embedding, self.similarity.composite_threshold(), 1)
                .await
            {
                Ok(matches) => {
                    if let Some(m) = matches.into_iter().next() {
                        tracing::debug!(
                            composite = %m.composite.name,
                            similarity = m.similarity,
                            "matched composite tool"
                        );
                        return ExecutionPlan::CompositeTool {
                            composite: m.composite,
                            similarity: m.similarity,
                        };
                    }
                }
                Err(e) => tracing::warn!(error = %e, "composite search failed"),
            }

            match self
                .store
                .search_patterns(embedding, self.similarity.pattern_threshold(), 1)
                .await
            {
                Ok(matches) => {
                    if let Some(m) = matches.into_iter().next() {
                        tracing::debug!(
                            pattern = %m.pattern.pattern_name,
                            similarity = m.similarity,
                            "matched workflow pattern"
                        );
                        return ExecutionPlan::WorkflowPattern {
                            pattern: m.pattern,
                            similarity: m.similarity,
                        };
                    }
                }
                Err(e) => tracing::warn!(error = %e, "pattern search failed"),
            }
        }

        match retry_once(|| self.oracle.decompose(request)).await {
            Ok(sub_tasks) if sub_tasks.len() > 1 => {
                // A single registered tool that covers the whole request
                // beats decomposing it.
                if let Some(embedding) = &embedding {
                    if let Ok(matches) = self
                        .store
                        .search_tools(embedding, self.similarity.single_override(), 1)
                        .await
                    {
                        if let Some(m) = matches.first() {
                            tracing::debug!(
                                tool = %m.tool.name,
                                similarity = m.similarity,
                                "single tool covers the whole request, skipping composition"
                            );
                            return ExecutionPlan::Single;
                        }
                    }
                }
                ExecutionPlan::MultiToolComposition { sub_tasks }
            }
            Ok(_) => ExecutionPlan::Single,
            Err(e) => {
                // Planning errors never block a best-effort direct attempt.
                tracing::warn!(error = %e, "decomposition failed, degrading to single");
                ExecutionPlan::Single
            }
        }
    }
}

fn is_creation_directive(request: &str) -> bool {
    let lower = request.to_lowercase();
    CREATION_DIRECTIVES.iter().any(|d| lower.contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_creation_directives() {
        assert!(is_creation_directive(
            "Create a new function to parse ISO dates"
        ));
        assert!(is_creation_directive("please make a tool that counts words"));
        assert!(!is_creation_directive("what is 25% of 100?"));
    }
}
