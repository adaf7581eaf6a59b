//! OpenAI-compatible HTTP implementation of the generation oracle.
//!
//! One chat-completions call per operation, low temperature for structured
//! output, JSON/code extraction on the reply. Transport and HTTP-level
//! failures map to `OracleUnavailable`; unparseable replies map to
//! `MalformedGeneration` so callers can regenerate once.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::OracleConfig;
use crate::errors::{AgentError, AgentResult};
use crate::oracle::GenerationOracle;
use crate::types::{ArgMap, SubTask, ToolSpec};
use crate::utils::{extract_code, extract_json, truncate};

const SPEC_PROMPT: &str = "You are a highly disciplined software architect. Your SOLE task is to design a \
function specification based on a user's request. You MUST NOT answer the request directly. Respond with \
ONLY a JSON object of this exact shape:\n\
{\"function_name\": \"snake_case_name\", \"parameters\": [{\"name\": \"...\", \"type\": \"...\", \
\"description\": \"...\"}], \"return_type\": \"...\", \"description\": \"detailed description with usage \
examples and edge cases\"}\n\
No other text, no markdown.";

const TESTS_PROMPT: &str = "You are a QA engineer. Write a comprehensive pytest suite for the given \
function specification. Cover normal use, then edge cases implied by the parameter types (empty input, \
zero, negative numbers, None). Use descriptive test names starting with 'test_' and assertions with \
failure messages. Return ONLY the test code.";

const IMPL_PROMPT: &str = "You are a developer. Implement the specified function so that it passes ALL \
provided tests. Clean, production-quality code with type hints and the given description as docstring. \
Return ONLY the function code, no explanations and no test code.";

const REGRESSION_PROMPT: &str = "You are a test engineer. Write one minimal pytest test function that \
reproduces the given failure exactly, suitable as a regression test. Return ONLY the test function code.";

const DECOMPOSE_PROMPT: &str = "You are a query analysis expert. Decide whether the request needs \
multiple tools or a single tool can handle it entirely (loading data and computing over it is ONE \
operation). Respond with ONLY a JSON object: {\"sub_tasks\": [{\"task\": \"...\", \"order\": 1, \
\"depends_on\": null}]}. Use one sub-task for single-tool requests; for multi-step requests set \
depends_on to the 1-based order of the step whose output a step consumes.";

const EXTRACT_PROMPT: &str = "You are a precise parameter extraction model. Extract argument values for \
the given function signature from the user's request. ONLY extract values explicitly present; return \
null for any parameter whose value is not in the request. Respond with ONLY a JSON object mapping \
parameter names to values.";

const SUMMARIZE_PROMPT: &str = "You are a helpful assistant. Given a user's question and a computed \
result, reply with a natural, concise, conversational answer. Don't over-explain.";

pub struct HttpGenerationOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpGenerationOracle {
    pub fn new(config: &OracleConfig) -> AgentResult<Self> {
        let api_key = std::env::var(config.api_key_env()).map_err(|_| {
            AgentError::Internal(format!("{} is not set", config.api_key_env()))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs()))
            .build()
            .map_err(|e| AgentError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint(),
            model: config.model(),
            api_key,
        })
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> AgentResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::OracleUnavailable(format!("chat request: {e}")))?;

        if !response.status().is_success() {
            return Err(AgentError::OracleUnavailable(format!(
                "chat request returned {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::MalformedGeneration(format!("chat response body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| AgentError::MalformedGeneration("chat response had no choices".into()))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl GenerationOracle for HttpGenerationOracle {
    async fn generate_spec(&self, request: &str) -> AgentResult<ToolSpec> {
        let reply = self.chat(SPEC_PROMPT, request, 0.2, 2000).await?;
        let json = extract_json(&reply)?;
        serde_json::from_value(json).map_err(|e| {
            AgentError::MalformedGeneration(format!(
                "spec does not match expected shape: {e}: {}",
                truncate(&reply, 200)
            ))
        })
    }

    async fn generate_tests(&self, spec: &ToolSpec) -> AgentResult<String> {
        let params = spec
            .parameters
            .iter()
            .map(|p| format!("  - {}: {} - {}", p.name, p.param_type, p.description))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Function Specification:\nName: {}\nParameters:\n{}\nReturn Type: {}\nDescription: {}\n\n\
             Generate comprehensive pytest tests for this function.",
            spec.function_name, params, spec.return_type, spec.description
        );
        let reply = self.chat(TESTS_PROMPT, &user, 0.3, 1500).await?;
        let code = extract_code(&reply);
        if !code.contains("def test_") {
            return Err(AgentError::MalformedGeneration(
                "generated tests contain no test functions".into(),
            ));
        }
        Ok(code)
    }

    async fn generate_implementation(
        &self,
        spec: &ToolSpec,
        tests: &str,
        feedback: Option<&str>,
    ) -> AgentResult<String> {
        let mut user = format!(
            "Function Specification:\nSignature: {}\nDocstring: {}\n\nTests that must pass:\n{}\n",
            spec.signature(),
            spec.description,
            tests
        );
        if let Some(feedback) = feedback {
            user.push_str(&format!(
                "\nA previous attempt failed. Fix the specific issue below while keeping all tests \
                 passing:\n{feedback}\n"
            ));
        }
        user.push_str("\nImplement the function to pass ALL tests.");
        let reply = self.chat(IMPL_PROMPT, &user, 0.2, 2000).await?;
        let code = extract_code(&reply);
        if !code.contains(&format!("def {}", spec.function_name)) {
            return Err(AgentError::MalformedGeneration(format!(
                "implementation does not define `{}`",
                spec.function_name
            )));
        }
        Ok(code)
    }

    async fn generate_regression_test(
        &self,
        source: &str,
        error: &str,
        inputs: &ArgMap,
    ) -> AgentResult<String> {
        let user = format!(
            "Tool code:\n{}\n\nError message:\n{}\n\nInputs that caused the failure:\n{}\n\n\
             Generate a minimal failing test case.",
            source,
            error,
            serde_json::Value::Object(inputs.clone())
        );
        let reply = self.chat(REGRESSION_PROMPT, &user, 0.2, 800).await?;
        Ok(extract_code(&reply))
    }

    async fn decompose(&self, request: &str) -> AgentResult<Vec<SubTask>> {
        let reply = self.chat(DECOMPOSE_PROMPT, request, 0.1, 800).await?;
        let json = extract_json(&reply)?;
        let sub_tasks = json
            .get("sub_tasks")
            .cloned()
            .ok_or_else(|| AgentError::MalformedGeneration("decomposition has no sub_tasks".into()))?;
        let mut sub_tasks: Vec<SubTask> = serde_json::from_value(sub_tasks).map_err(|e| {
            AgentError::MalformedGeneration(format!("decomposition does not parse: {e}"))
        })?;
        if sub_tasks.is_empty() {
            return Err(AgentError::MalformedGeneration(
                "decomposition returned no sub-tasks".into(),
            ));
        }
        sub_tasks.sort_by_key(|t| t.order);
        Ok(sub_tasks)
    }

    async fn extract_arguments(
        &self,
        request: &str,
        signature: &str,
        feedback: Option<&str>,
    ) -> AgentResult<ArgMap> {
        let mut user = format!("Function Signature:\n{signature}\n\nUser Request:\n{request}\n");
        if let Some(feedback) = feedback {
            user.push_str(&format!(
                "\nA previous attempt failed with this error; re-read the request with it in \
                 mind:\n{feedback}\n"
            ));
        }
        user.push_str("\nExtract the arguments as JSON.");
        let reply = self.chat(EXTRACT_PROMPT, &user, 0.0, 500).await?;
        match extract_json(&reply)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(AgentError::MalformedGeneration(format!(
                "argument extraction returned a non-object: {other}"
            ))),
        }
    }

    async fn embed(&self, text: &str) -> AgentResult<Vec<f32>> {
        let body = serde_json::json!({
            "model": "text-embedding-3-small",
            "input": text,
        });
        let response = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::OracleUnavailable(format!("embedding request: {e}")))?;
        if !response.status().is_success() {
            return Err(AgentError::OracleUnavailable(format!(
                "embedding request returned {}",
                response.status()
            )));
        }
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AgentError::MalformedGeneration(format!("embedding body: {e}")))?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                AgentError::MalformedGeneration("embedding response had no data".into())
            })?;
        if embedding.len() != crate::oracle::EMBEDDING_DIM {
            tracing::warn!(
                dims = embedding.len(),
                "embedding dimensionality differs from the expected {}",
                crate::oracle::EMBEDDING_DIM
            );
        }
        Ok(embedding)
    }

    async fn summarize(&self, request: &str, result: &serde_json::Value) -> AgentResult<String> {
        let user = format!("User asked: {request}\n\nResult: {result}\n\nProvide a helpful response.");
        self.chat(SUMMARIZE_PROMPT, &user, 0.7, 300).await
    }
}
