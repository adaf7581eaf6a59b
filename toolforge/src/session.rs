//! Session context: prior conversational turns owned by the caller-facing
//! layer, consumed read-only to enrich an incoming request before planning.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::{AgentError, AgentResult};
use crate::types::SessionMessage;

#[async_trait]
pub trait SessionContext: Send + Sync {
    /// Most recent messages for a session, oldest first.
    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> AgentResult<Vec<SessionMessage>>;

    /// Persist one turn. The core appends the user request and the final
    /// assistant response; everything else is the caller's business.
    async fn append_message(&self, session_id: &str, role: &str, content: &str)
        -> AgentResult<()>;
}

/// Append recent history as a trailing context block, so earlier turns are
/// available to argument extraction without polluting the request itself.
pub fn enrich_request(request: &str, history: &[SessionMessage]) -> String {
    if history.is_empty() {
        return request.to_string();
    }
    let context = history
        .iter()
        .map(|m| {
            let label = if m.role.eq_ignore_ascii_case("user") {
                "User"
            } else {
                "Assistant"
            };
            format!("{label}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{request}\n\nContext from the previous exchange (use only if relevant):\n{context}"
    )
}

/// In-memory session provider.
#[derive(Default)]
pub struct InMemorySessions {
    messages: RwLock<HashMap<String, Vec<SessionMessage>>>,
}

impl InMemorySessions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionContext for InMemorySessions {
    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> AgentResult<Vec<SessionMessage>> {
        let messages = self
            .messages
            .read()
            .map_err(|_| AgentError::Store("session lock poisoned".into()))?;
        let all = messages.get(session_id).cloned().unwrap_or_default();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> AgentResult<()> {
        if content.is_empty() {
            return Ok(());
        }
        let mut messages = self
            .messages
            .write()
            .map_err(|_| AgentError::Store("session lock poisoned".into()))?;
        let turns = messages.entry(session_id.to_string()).or_default();
        let message_index = turns.len();
        turns.push(SessionMessage {
            role: role.to_string(),
            content: content.to_string(),
            message_index,
        });
        Ok(())
    }
}
