#![allow(dead_code)]
//! Scripted oracle and sandbox doubles for integration tests.
//!
//! The mock oracle maps keyword "concepts" to fixed specs, implementations
//! and one-hot embeddings, so similarity search behaves deterministically:
//! texts sharing a concept keyword embed identically, everything else is
//! orthogonal.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use toolforge::config::AgentConfig;
use toolforge::errors::{AgentError, AgentResult};
use toolforge::oracle::GenerationOracle;
use toolforge::orchestrator::Orchestrator;
use toolforge::sandbox::ExecutionOracle;
use toolforge::session::InMemorySessions;
use toolforge::store::{CapabilityStore, InMemoryStore};
use toolforge::types::{
    ArgMap, InvokeOutput, ParamSpec, SubTask, ToolManifest, ToolSpec, VerificationReport,
};

pub const EMBED_DIM: usize = 8;

#[derive(Clone)]
pub struct Concept {
    pub keyword: &'static str,
    pub spec: ToolSpec,
    pub implementation: &'static str,
    pub repaired_implementation: &'static str,
    pub tests: &'static str,
    pub args: serde_json::Value,
}

pub struct MockOracle {
    concepts: Vec<Concept>,
    decompositions: HashMap<&'static str, Vec<SubTask>>,
    pub spec_calls: AtomicUsize,
    pub implementation_calls: AtomicUsize,
    pub fail_decompose: AtomicBool,
    pub extraction_feedback: Mutex<Vec<String>>,
}

impl MockOracle {
    pub fn new(concepts: Vec<Concept>) -> Self {
        Self {
            concepts,
            decompositions: HashMap::new(),
            spec_calls: AtomicUsize::new(0),
            implementation_calls: AtomicUsize::new(0),
            fail_decompose: AtomicBool::new(false),
            extraction_feedback: Mutex::new(Vec::new()),
        }
    }

    pub fn with_decomposition(mut self, keyword: &'static str, sub_tasks: Vec<SubTask>) -> Self {
        self.decompositions.insert(keyword, sub_tasks);
        self
    }

    fn concept_for(&self, text: &str) -> Option<(usize, &Concept)> {
        let lower = text.to_lowercase();
        self.concepts
            .iter()
            .enumerate()
            .find(|(_, c)| lower.contains(c.keyword))
    }

    pub fn one_hot(dim: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBED_DIM];
        v[dim % EMBED_DIM] = 1.0;
        v
    }
}

#[async_trait]
impl GenerationOracle for MockOracle {
    async fn generate_spec(&self, request: &str) -> AgentResult<ToolSpec> {
        self.spec_calls.fetch_add(1, Ordering::SeqCst);
        self.concept_for(request)
            .map(|(_, c)| c.spec.clone())
            .ok_or_else(|| AgentError::MalformedGeneration(format!("no concept for: {request}")))
    }

    async fn generate_tests(&self, spec: &ToolSpec) -> AgentResult<String> {
        self.concept_for(&spec.description)
            .map(|(_, c)| c.tests.to_string())
            .ok_or_else(|| AgentError::MalformedGeneration("no concept for spec".into()))
    }

    async fn generate_implementation(
        &self,
        spec: &ToolSpec,
        _tests: &str,
        feedback: Option<&str>,
    ) -> AgentResult<String> {
        self.implementation_calls.fetch_add(1, Ordering::SeqCst);
        let (_, concept) = self
            .concept_for(&spec.description)
            .ok_or_else(|| AgentError::MalformedGeneration("no concept for spec".into()))?;
        if feedback.is_some() {
            Ok(concept.repaired_implementation.to_string())
        } else {
            Ok(concept.implementation.to_string())
        }
    }

    async fn generate_regression_test(
        &self,
        _source: &str,
        error: &str,
        _inputs: &ArgMap,
    ) -> AgentResult<String> {
        Ok(format!("def test_regression():\n    # reproduces: {error}\n    pass"))
    }

    async fn decompose(&self, request: &str) -> AgentResult<Vec<SubTask>> {
        if self.fail_decompose.load(Ordering::SeqCst) {
            return Err(AgentError::OracleUnavailable("decompose offline".into()));
        }
        let lower = request.to_lowercase();
        for (keyword, sub_tasks) in &self.decompositions {
            if lower.contains(keyword) {
                return Ok(sub_tasks.clone());
            }
        }
        Ok(vec![SubTask {
            task: request.to_string(),
            order: 1,
            depends_on: None,
        }])
    }

    async fn extract_arguments(
        &self,
        request: &str,
        _signature: &str,
        feedback: Option<&str>,
    ) -> AgentResult<ArgMap> {
        if let Some(feedback) = feedback {
            self.extraction_feedback
                .lock()
                .unwrap()
                .push(feedback.to_string());
        }
        let args = self
            .concept_for(request)
            .map(|(_, c)| c.args.clone())
            .unwrap_or_else(|| serde_json::json!({}));
        match args {
            serde_json::Value::Object(map) => Ok(map),
            _ => Ok(ArgMap::new()),
        }
    }

    async fn embed(&self, text: &str) -> AgentResult<Vec<f32>> {
        Ok(self
            .concept_for(text)
            .map(|(dim, _)| Self::one_hot(dim))
            .unwrap_or_else(|| vec![0.0; EMBED_DIM]))
    }

    async fn summarize(&self, _request: &str, result: &serde_json::Value) -> AgentResult<String> {
        Ok(format!("Here you go: {result}"))
    }
}

type InvokeFn = dyn Fn(&str, &str, &ArgMap) -> InvokeOutput + Send + Sync;

pub struct MockSandbox {
    /// Scripted verification verdicts, consumed in order; empty means pass.
    verify_script: Mutex<Vec<bool>>,
    invoke_fn: Box<InvokeFn>,
    pub verify_calls: AtomicUsize,
    pub invoke_calls: AtomicUsize,
}

impl MockSandbox {
    pub fn passing(invoke_fn: Box<InvokeFn>) -> Self {
        Self {
            verify_script: Mutex::new(Vec::new()),
            invoke_fn,
            verify_calls: AtomicUsize::new(0),
            invoke_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_verify_script(mut self, verdicts: Vec<bool>) -> Self {
        self.verify_script = Mutex::new(verdicts);
        self
    }
}

#[async_trait]
impl ExecutionOracle for MockSandbox {
    async fn verify(
        &self,
        _name: &str,
        _source: &str,
        _tests: &str,
        _data_files: &[(String, String)],
    ) -> AgentResult<VerificationReport> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.verify_script.lock().unwrap();
        let passed = if script.is_empty() {
            true
        } else {
            script.remove(0)
        };
        Ok(VerificationReport {
            passed,
            output: if passed {
                "4 passed".into()
            } else {
                "1 failed: assert ...".into()
            },
        })
    }

    async fn invoke(&self, name: &str, source: &str, args: &ArgMap) -> AgentResult<InvokeOutput> {
        self.invoke_calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.invoke_fn)(name, source, args))
    }
}

pub fn ok_value(value: serde_json::Value) -> InvokeOutput {
    InvokeOutput {
        success: true,
        value,
        error: None,
    }
}

pub fn err_value(error: &str) -> InvokeOutput {
    InvokeOutput {
        success: false,
        value: serde_json::Value::Null,
        error: Some(error.to_string()),
    }
}

pub fn reverse_concept() -> Concept {
    Concept {
        keyword: "reverse",
        spec: ToolSpec {
            function_name: "reverse_string".into(),
            parameters: vec![ParamSpec {
                name: "s".into(),
                param_type: "str".into(),
                description: "the string to reverse".into(),
            }],
            return_type: "str".into(),
            description: "Reverse a string. Example: reverse_string('hello') returns 'olleh'."
                .into(),
        },
        implementation: "def reverse_string(s: str) -> str:\n    return s[::-1]",
        repaired_implementation: "def reverse_string(s: str) -> str:\n    return ''.join(reversed(s))",
        tests: "def test_reverse_normal():\n    assert reverse_string('hello') == 'olleh'\n\ndef test_reverse_empty():\n    assert reverse_string('') == ''",
        args: serde_json::json!({ "s": "hello" }),
    }
}

pub fn margin_concept() -> Concept {
    Concept {
        keyword: "margin",
        spec: ToolSpec {
            function_name: "calculate_margin".into(),
            parameters: vec![
                ParamSpec {
                    name: "price".into(),
                    param_type: "float".into(),
                    description: "sale price".into(),
                },
                ParamSpec {
                    name: "cost".into(),
                    param_type: "float".into(),
                    description: "unit cost".into(),
                },
            ],
            return_type: "float".into(),
            description: "Calculate the profit margin of a product from price and cost.".into(),
        },
        implementation: "def calculate_margin(price: float, cost: float) -> float:\n    return (price - cost) / price",
        repaired_implementation: "def calculate_margin(price: float, cost: float) -> float:\n    if price == 0:\n        return 0.0\n    return (price - cost) / price",
        tests: "def test_margin_normal():\n    assert calculate_margin(100.0, 60.0) == 0.4",
        args: serde_json::json!({ "price": 0.0, "cost": 10.0 }),
    }
}

pub fn percent_concept() -> Concept {
    Concept {
        keyword: "percent",
        spec: ToolSpec {
            function_name: "calculate_percentage".into(),
            parameters: vec![
                ParamSpec {
                    name: "base".into(),
                    param_type: "float".into(),
                    description: "base value".into(),
                },
                ParamSpec {
                    name: "percentage".into(),
                    param_type: "float".into(),
                    description: "percent to take".into(),
                },
            ],
            return_type: "float".into(),
            description: "Calculate a percent of a base number.".into(),
        },
        implementation: "def calculate_percentage(base: float, percentage: float) -> float:\n    return base * percentage / 100",
        repaired_implementation: "def calculate_percentage(base: float, percentage: float) -> float:\n    return base * percentage / 100",
        tests: "def test_percentage():\n    assert calculate_percentage(100, 25) == 25.0",
        args: serde_json::json!({ "base": 100.0, "percentage": 25.0 }),
    }
}

/// Default invoke behavior for the stock concepts: reversal works, margin
/// division fails on zero price unless the source carries the guard.
pub fn default_invoke(name: &str, source: &str, args: &ArgMap) -> InvokeOutput {
    match name {
        "reverse_string" => match args.get("s").and_then(|v| v.as_str()) {
            Some(s) => ok_value(serde_json::json!(s.chars().rev().collect::<String>())),
            None => err_value("TypeError: missing 1 required positional argument: 's'"),
        },
        "calculate_percentage" => {
            let base = args.get("base").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let pct = args.get("percentage").and_then(|v| v.as_f64()).unwrap_or(0.0);
            ok_value(serde_json::json!(base * pct / 100.0))
        }
        "calculate_margin" => {
            let price = args.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let cost = args.get("cost").and_then(|v| v.as_f64()).unwrap_or(0.0);
            if price == 0.0 {
                if source.contains("if price == 0") {
                    ok_value(serde_json::json!(0.0))
                } else {
                    err_value("ZeroDivisionError: division by zero")
                }
            } else {
                ok_value(serde_json::json!((price - cost) / price))
            }
        }
        other => err_value(&format!("NameError: unknown tool {other}")),
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<InMemoryStore>,
    pub oracle: Arc<MockOracle>,
    pub sandbox: Arc<MockSandbox>,
}

pub fn harness(oracle: MockOracle, sandbox: MockSandbox) -> Harness {
    let oracle = Arc::new(oracle);
    let sandbox = Arc::new(sandbox);
    let store = Arc::new(InMemoryStore::new());
    let sessions = Arc::new(InMemorySessions::new());
    let orchestrator = Orchestrator::new(
        AgentConfig::default(),
        oracle.clone(),
        sandbox.clone(),
        store.clone(),
        store.clone(),
        sessions,
    );
    Harness {
        orchestrator,
        store,
        oracle,
        sandbox,
    }
}

/// Assert that `expected` occurs as an ordered subsequence of the emitted
/// stage/status pairs. Extra events in between are allowed; reordering is
/// not.
pub fn assert_stage_subsequence(
    actual: &[(toolforge::events::ProgressStage, toolforge::events::StageStatus)],
    expected: &[(toolforge::events::ProgressStage, toolforge::events::StageStatus)],
) {
    let mut cursor = 0;
    for pair in actual {
        if cursor < expected.len() && *pair == expected[cursor] {
            cursor += 1;
        }
    }
    assert_eq!(
        cursor,
        expected.len(),
        "missing {:?} in emitted stages {:?}",
        &expected[cursor..],
        actual
    );
}

/// Register a concept's tool directly in the store, as if a previous session
/// had synthesized it.
pub async fn preregister(store: &InMemoryStore, oracle: &MockOracle, concept: &Concept) {
    let embedding = oracle.embed(&concept.spec.description).await.unwrap();
    let tool = ToolManifest::new(
        &concept.spec,
        concept.implementation.to_string(),
        concept.tests.to_string(),
        embedding,
    );
    store.put_tool(tool).await.unwrap();
}
