//! Reasoning client seam
//!
//! One call per Reasoning state: history and tool declarations in, an
//! `AssistantTurn` out. The loop never sees wire formats.

pub mod gemini;

pub use gemini::GeminiReasoner;

use crate::error::AssistantError;
use crate::models::{AssistantTurn, Message};
use crate::tools::ToolRegistry;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Decide the next move. Malformed service output is `ReasoningService`.
    async fn step(&self, history: &[Message], tools: &ToolRegistry) -> Result<AssistantTurn>;
}

/// Replays a fixed script of turns, for tests and offline runs
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<AssistantTurn>>>,
    repeat: Option<AssistantTurn>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    histories: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedReasoner {
    pub fn new(turns: Vec<AssistantTurn>) -> Self {
        Self::with_outcomes(turns.into_iter().map(Ok).collect())
    }

    pub fn with_outcomes(outcomes: Vec<Result<AssistantTurn>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            repeat: None,
            delay: None,
            calls: AtomicUsize::new(0),
            histories: Mutex::new(Vec::new()),
        }
    }

    /// Returns the same turn on every call, forever
    pub fn repeating(turn: AssistantTurn) -> Self {
        Self {
            repeat: Some(turn),
            ..Self::with_outcomes(Vec::new())
        }
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Histories received, one entry per call
    pub async fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().await.clone()
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoner {
    async fn step(&self, history: &[Message], _tools: &ToolRegistry) -> Result<AssistantTurn> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().await.push(history.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(next) = self.script.lock().await.pop_front() {
            return next;
        }

        self.repeat.clone().ok_or_else(|| {
            AssistantError::ReasoningService("scripted reasoner has no turns left".to_string())
        })
    }
}
