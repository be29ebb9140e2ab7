//! Session history with tool-call pairing checks
//!
//! Every tool result must answer a call made by the assistant message
//! immediately preceding the batch, and no new human or assistant message may
//! be appended while calls are still unanswered.

use crate::error::AssistantError;
use crate::models::{Message, Role};
use crate::Result;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: String,
    messages: Vec<Message>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
        }
    }

    /// Rebuild a session from stored history, re-checking pairing
    pub fn restore(id: impl Into<String>, messages: Vec<Message>) -> Result<Self> {
        let mut session = Self::new(id);
        for message in messages {
            session.push(message)?;
        }
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages appended at or after `from`
    pub fn since(&self, from: usize) -> &[Message] {
        &self.messages[from.min(self.messages.len())..]
    }

    pub fn push(&mut self, message: Message) -> Result<()> {
        let pending = self.pending_calls();

        match message.role {
            Role::ToolResult => {
                let call_id = message.call_id.as_deref().ok_or_else(|| {
                    AssistantError::Session("tool result without call_id".to_string())
                })?;
                if !pending.contains(call_id) {
                    return Err(AssistantError::Session(format!(
                        "tool result '{}' does not answer a pending call",
                        call_id
                    )));
                }
            }
            Role::Human | Role::Assistant if !pending.is_empty() => {
                return Err(AssistantError::Session(format!(
                    "{} tool call(s) still unanswered in session {}",
                    pending.len(),
                    self.id
                )));
            }
            _ => {}
        }

        if message.requests_tools() {
            let mut seen = HashSet::new();
            if let Some(dup) = message
                .tool_calls
                .iter()
                .find(|c| !seen.insert(c.call_id.as_str()))
            {
                return Err(AssistantError::Session(format!(
                    "duplicate call_id '{}' in one request",
                    dup.call_id
                )));
            }
        }

        self.messages.push(message);
        Ok(())
    }

    /// Call ids requested by the latest tool-requesting message and not yet answered
    pub fn pending_calls(&self) -> HashSet<&str> {
        let Some(start) = self.messages.iter().rposition(Message::requests_tools) else {
            return HashSet::new();
        };

        let mut pending: HashSet<&str> = self.messages[start]
            .tool_calls
            .iter()
            .map(|c| c.call_id.as_str())
            .collect();

        for message in &self.messages[start + 1..] {
            if let Some(id) = message.call_id.as_deref() {
                pending.remove(id);
            }
        }

        pending
    }
}
