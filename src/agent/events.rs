//! Events pushed to streaming clients while a turn runs

use crate::models::{ToolCall, ToolResult};
use serde::Serialize;

/// How a turn ended
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    /// Stopped at the iteration cap with the fallback reply
    IterationCap,
    Failed,
    Cancelled,
}

/// One line of the NDJSON stream
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Start {
        session_id: String,
    },
    ToolCall {
        iteration: u32,
        tools: Vec<ToolCall>,
    },
    ToolResult {
        outputs: Vec<ToolResult>,
    },
    Token {
        content: String,
    },
    End {
        session_id: String,
        status: TurnStatus,
    },
    Error {
        content: String,
    },
}

impl AgentEvent {
    /// Serialized line, newline included
    pub fn to_ndjson(&self) -> String {
        match serde_json::to_string(self) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(e) => format!("{{\"type\":\"error\",\"content\":\"unserializable event: {}\"}}\n", e),
        }
    }
}
