//! Agent configuration: similarity thresholds, retry bounds, sandbox limits,
//! promotion criteria, oracle endpoint. Loaded from TOML with
//! `TOOLFORGE_`-prefixed environment overrides on top.

use serde::Deserialize;
use std::env;
use std::path::Path;

use crate::errors::{AgentError, AgentResult};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub similarity: SimilarityConfig,
    pub retry: RetryConfig,
    pub sandbox: SandboxLimits,
    pub promotion: PromotionConfig,
    pub oracle: OracleConfig,
    pub mining: MiningConfig,
    /// Register a tool as experimental when its regenerated implementation
    /// still fails verification, instead of discarding the attempt.
    pub register_experimental: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Minimum similarity for a direct tool match.
    pub tool_threshold: Option<f32>,
    /// Minimum similarity for a composite-tool match.
    pub composite_threshold: Option<f32>,
    /// Minimum similarity for a workflow-pattern match.
    pub pattern_threshold: Option<f32>,
    /// A direct match at or above this collapses a multi-step analysis back
    /// to a single-tool plan.
    pub single_override: Option<f32>,
}

impl SimilarityConfig {
    pub fn tool_threshold(&self) -> f32 {
        self.tool_threshold.unwrap_or(0.4)
    }
    pub fn composite_threshold(&self) -> f32 {
        self.composite_threshold.unwrap_or(0.7)
    }
    pub fn pattern_threshold(&self) -> f32 {
        self.pattern_threshold.unwrap_or(0.7)
    }
    pub fn single_override(&self) -> f32 {
        self.single_override.unwrap_or(0.6)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RetryConfig {
    /// Runtime-failure retries per execution, each with the error appended
    /// to the argument-extraction context.
    pub max_execution_retries: Option<u32>,
}

impl RetryConfig {
    pub fn max_execution_retries(&self) -> u32 {
        self.max_execution_retries.unwrap_or(2)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SandboxLimits {
    pub image: Option<String>,
    pub timeout_secs: Option<u64>,
    pub memory_mb: Option<u64>,
    /// Fraction of one core the sandboxed process may consume.
    pub cpu_share: Option<f64>,
}

impl SandboxLimits {
    pub fn image(&self) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| "toolforge-sandbox".to_string())
    }
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(30)
    }
    pub fn memory_mb(&self) -> u64 {
        self.memory_mb.unwrap_or(512)
    }
    pub fn cpu_share(&self) -> f64 {
        self.cpu_share.unwrap_or(0.5)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PromotionConfig {
    pub min_frequency: Option<u64>,
    pub min_success_rate: Option<f64>,
    pub min_confidence: Option<f64>,
}

impl PromotionConfig {
    pub fn min_frequency(&self) -> u64 {
        self.min_frequency.unwrap_or(3)
    }
    pub fn min_success_rate(&self) -> f64 {
        self.min_success_rate.unwrap_or(0.8)
    }
    pub fn min_confidence(&self) -> f64 {
        self.min_confidence.unwrap_or(0.7)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OracleConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// Environment variable holding the API key; the key itself never lives
    /// in config files.
    pub api_key_env: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

impl OracleConfig {
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
    }
    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| "gpt-4".to_string())
    }
    pub fn api_key_env(&self) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| "OPENAI_API_KEY".to_string())
    }
    pub fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs.unwrap_or(60)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MiningConfig {
    /// Minimum observation count before a pattern is considered established.
    pub min_pattern_frequency: Option<u64>,
    /// Largest contiguous subsequence window mined from a session.
    pub max_subsequence_len: Option<usize>,
}

impl MiningConfig {
    pub fn min_pattern_frequency(&self) -> u64 {
        self.min_pattern_frequency.unwrap_or(2)
    }
    pub fn max_subsequence_len(&self) -> usize {
        self.max_subsequence_len.unwrap_or(3)
    }
}

impl AgentConfig {
    pub fn register_experimental(&self) -> bool {
        self.register_experimental.unwrap_or(true)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> AgentResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AgentError::Internal(format!("cannot read config: {e}")))?;
        let mut config: AgentConfig = toml::from_str(&raw)
            .map_err(|e| AgentError::Internal(format!("cannot parse config: {e}")))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides; used when no config file exists.
    pub fn from_env() -> Self {
        let mut config = AgentConfig::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<f32>("TOOLFORGE_SIMILARITY_THRESHOLD") {
            self.similarity.tool_threshold = Some(v);
        }
        if let Some(v) = env_parse::<u64>("TOOLFORGE_SANDBOX_TIMEOUT_SECS") {
            self.sandbox.timeout_secs = Some(v);
        }
        if let Some(v) = env_parse::<u64>("TOOLFORGE_SANDBOX_MEMORY_MB") {
            self.sandbox.memory_mb = Some(v);
        }
        if let Ok(v) = env::var("TOOLFORGE_SANDBOX_IMAGE") {
            self.sandbox.image = Some(v);
        }
        if let Ok(v) = env::var("TOOLFORGE_ORACLE_ENDPOINT") {
            self.oracle.endpoint = Some(v);
        }
        if let Ok(v) = env::var("TOOLFORGE_ORACLE_MODEL") {
            self.oracle.model = Some(v);
        }
        if let Some(v) = env_parse::<u32>("TOOLFORGE_MAX_EXECUTION_RETRIES") {
            self.retry.max_execution_retries = Some(v);
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AgentConfig::default();
        assert_eq!(config.similarity.tool_threshold(), 0.4);
        assert_eq!(config.similarity.composite_threshold(), 0.7);
        assert_eq!(config.retry.max_execution_retries(), 2);
        assert_eq!(config.sandbox.timeout_secs(), 30);
        assert_eq!(config.sandbox.memory_mb(), 512);
        assert_eq!(config.promotion.min_frequency(), 3);
        assert!(config.register_experimental());
    }

    #[test]
    fn toml_overrides_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
            [similarity]
            tool_threshold = 0.55

            [sandbox]
            timeout_secs = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.similarity.tool_threshold(), 0.55);
        assert_eq!(config.sandbox.timeout_secs(), 10);
        assert_eq!(config.sandbox.memory_mb(), 512);
    }
}
