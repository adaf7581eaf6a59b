//! Small helpers: oracle output extraction, vector math, time.

use crate::errors::{AgentError, AgentResult};

/// Pull the first JSON object out of a completion, tolerating surrounding
/// prose and markdown fences. The outermost `{`..`}` span is the most robust
/// cut given how the oracle formats answers.
pub fn extract_json(response: &str) -> AgentResult<serde_json::Value> {
    let start = response.find('{');
    let end = response.rfind('}');
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) if e > s => (s, e),
        _ => {
            return Err(AgentError::MalformedGeneration(format!(
                "no JSON object found in oracle output: {}",
                truncate(response, 200)
            )))
        }
    };
    serde_json::from_str(&response[start..=end]).map_err(|e| {
        AgentError::MalformedGeneration(format!(
            "oracle output is not valid JSON: {e}: {}",
            truncate(response, 200)
        ))
    })
}

/// Strip a markdown code fence if present, returning the inner code.
pub fn extract_code(response: &str) -> String {
    let trimmed = response.trim();
    for fence in ["```python", "```"] {
        if let Some(rest) = trimmed.split_once(fence).map(|(_, r)| r) {
            if let Some((code, _)) = rest.split_once("```") {
                return code.trim().to_string();
            }
        }
    }
    trimmed.to_string()
}

/// Cosine similarity between two embedding vectors. Mismatched or zero
/// vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
