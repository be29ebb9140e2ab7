//! Core data models for the finance assistant

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Assistant,
    ToolResult,
}

/// A single turn in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Self::with_role(Role::Human, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Assistant message that requests tool execution
    pub fn tool_request(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::with_role(Role::Assistant, String::new())
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self {
            call_id: Some(result.call_id.clone()),
            tool_name: Some(result.tool_name.clone()),
            ..Self::with_role(Role::ToolResult, result.content())
        }
    }

    fn with_role(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            call_id: None,
            tool_name: None,
            created_at: Utc::now(),
        }
    }

    pub fn requests_tools(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// Structured request from the reasoning service to invoke a named tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Output of one reasoning step
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantTurn {
    FinalReply(String),
    ToolRequest(Vec<ToolCall>),
}

//
// ================= Tool Results =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidArgument,
    UnknownTool,
    HandlerFailure,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolErrorKind::InvalidArgument => "invalid_argument",
            ToolErrorKind::UnknownTool => "unknown_tool",
            ToolErrorKind::HandlerFailure => "handler_failure",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutcome {
    Success { summary: String },
    Error { kind: ToolErrorKind, message: String },
}

/// Normalized result of a single tool invocation, always answering one `ToolCall`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, summary: String) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Success { summary },
        }
    }

    pub fn error(call: &ToolCall, kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Error {
                kind,
                message: message.into(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error { .. })
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match self.outcome {
            ToolOutcome::Error { kind, .. } => Some(kind),
            ToolOutcome::Success { .. } => None,
        }
    }

    /// Text fed back into the conversation
    pub fn content(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { summary } => summary.clone(),
            ToolOutcome::Error { kind, message } => format!("Error ({}): {}", kind, message),
        }
    }
}

//
// ================= External Entities =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpenseRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub user_id: String,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Expense write request handed to the storage collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewExpense {
    pub user_id: String,
    pub amount: f64,
    pub description: String,
    pub category: String,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    #[serde(default)]
    pub id: Option<String>,
    pub user_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
