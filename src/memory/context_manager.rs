//! Context Window Management
//!
//! Bounds how much session history is sent to the reasoning service. The
//! cut always lands on a human message so a tool request is never separated
//! from its results.

use crate::models::{Message, Role};
use tracing::debug;

/// Configuration for context window management
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Maximum messages sent per reasoning call
    pub max_history_messages: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_history_messages: 40,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextWindow {
    config: ContextConfig,
}

impl ContextWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Most recent slice of `history` that fits, starting at a human message.
    ///
    /// If no human message falls inside the budget the slice starts at the
    /// latest human message before it, exceeding the budget.
    pub fn select<'a>(&self, history: &'a [Message]) -> &'a [Message] {
        let max = self.config.max_history_messages.max(1);
        if history.len() <= max {
            return history;
        }

        let earliest = history.len() - max;
        let is_human = |m: &Message| m.role == Role::Human;

        let start = history[earliest..]
            .iter()
            .position(is_human)
            .map(|offset| earliest + offset)
            .or_else(|| history[..earliest].iter().rposition(is_human))
            .unwrap_or(0);

        debug!(
            total = history.len(),
            sent = history.len() - start,
            "trimmed history for reasoning call"
        );
        &history[start..]
    }
}
