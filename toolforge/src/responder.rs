//! Natural-language response synthesis over tool results.

use std::sync::Arc;

use crate::oracle::GenerationOracle;

pub struct ResponseSynthesizer {
    oracle: Arc<dyn GenerationOracle>,
}

impl ResponseSynthesizer {
    pub fn new(oracle: Arc<dyn GenerationOracle>) -> Self {
        Self { oracle }
    }

    /// Conversational reply for a computed result. Degrades to a plain
    /// rendering when the oracle is unavailable — a working result beats a
    /// pretty sentence.
    pub async fn respond(&self, request: &str, result: &serde_json::Value) -> String {
        match self.oracle.summarize(request, result).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "response synthesis degraded to plain rendering");
                render_plain(result)
            }
        }
    }

    /// Human-readable failure explanation. Always names what failed; the
    /// oracle only gets to phrase it.
    pub async fn respond_error(&self, request: &str, error: &str) -> String {
        let payload = serde_json::json!({ "error": error });
        match self.oracle.summarize(request, &payload).await {
            Ok(reply) => reply,
            Err(_) => format!("The request could not be completed: {error}"),
        }
    }
}

fn render_plain(result: &serde_json::Value) -> String {
    match result {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_rendering_unquotes_strings() {
        assert_eq!(render_plain(&serde_json::json!("olleh")), "olleh");
        assert_eq!(render_plain(&serde_json::json!(42.5)), "42.5");
    }
}
