//! Typed tool commands
//!
//! Each tool decodes into its own argument record. The executor matches on
//! `ToolCommand` exhaustively, so adding a tool without a handler does not compile.

use super::ToolKind;
use crate::error::AssistantError;
use crate::Result;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

pub const DEFAULT_FETCH_LIMIT: u32 = 20;
pub const MAX_FETCH_LIMIT: u32 = 100;
pub const DEFAULT_CATEGORY: &str = "General";
pub const DEFAULT_DESCRIPTION: &str = "expense";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateExpenseArgs {
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl CreateExpenseArgs {
    pub fn description(&self) -> String {
        non_blank(self.description.as_deref()).unwrap_or(DEFAULT_DESCRIPTION).to_string()
    }

    pub fn category(&self) -> String {
        non_blank(self.category.as_deref()).unwrap_or(DEFAULT_CATEGORY).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNoteArgs {
    pub text: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchArgs {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl FetchArgs {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_FETCH_LIMIT).min(MAX_FETCH_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeArgs {
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCommand {
    CreateExpense(CreateExpenseArgs),
    CreateNote(CreateNoteArgs),
    FetchExpenses(FetchArgs),
    FetchNotes(FetchArgs),
    Analyze(AnalyzeArgs),
}

impl ToolCommand {
    /// Decode schema-checked arguments and apply per-tool value rules
    pub fn from_validated(kind: ToolKind, mut args: Map<String, Value>) -> Result<Self> {
        // Explicit nulls are treated as omitted.
        args.retain(|_, v| !v.is_null());

        let command = match kind {
            ToolKind::CreateExpense => {
                let args: CreateExpenseArgs = decode(kind, args)?;
                if !(args.amount.is_finite() && args.amount > 0.0) {
                    return Err(AssistantError::InvalidArgument(format!(
                        "amount must be a positive number, got {}",
                        args.amount
                    )));
                }
                ToolCommand::CreateExpense(args)
            }
            ToolKind::CreateNote => {
                let args: CreateNoteArgs = decode(kind, args)?;
                if args.text.trim().is_empty() {
                    return Err(AssistantError::InvalidArgument(
                        "note text must not be empty".to_string(),
                    ));
                }
                ToolCommand::CreateNote(args)
            }
            ToolKind::FetchExpenses => ToolCommand::FetchExpenses(decode_fetch(kind, args)?),
            ToolKind::FetchNotes => ToolCommand::FetchNotes(decode_fetch(kind, args)?),
            ToolKind::Analyze => {
                let args: AnalyzeArgs = decode(kind, args)?;
                if args.data.trim().is_empty() {
                    return Err(AssistantError::InvalidArgument(
                        "analyze needs data to work with".to_string(),
                    ));
                }
                ToolCommand::Analyze(args)
            }
        };

        Ok(command)
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCommand::CreateExpense(_) => ToolKind::CreateExpense,
            ToolCommand::CreateNote(_) => ToolKind::CreateNote,
            ToolCommand::FetchExpenses(_) => ToolKind::FetchExpenses,
            ToolCommand::FetchNotes(_) => ToolKind::FetchNotes,
            ToolCommand::Analyze(_) => ToolKind::Analyze,
        }
    }

    /// The `user_id` the reasoning service passed explicitly, if any
    pub fn requested_user(&self) -> Option<&str> {
        match self {
            ToolCommand::CreateExpense(a) => a.user_id.as_deref(),
            ToolCommand::CreateNote(a) => a.user_id.as_deref(),
            ToolCommand::FetchExpenses(a) | ToolCommand::FetchNotes(a) => a.user_id.as_deref(),
            ToolCommand::Analyze(_) => None,
        }
    }
}

fn decode<T: DeserializeOwned>(kind: ToolKind, args: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| AssistantError::InvalidArgument(format!("{}: {}", kind, e)))
}

fn decode_fetch(kind: ToolKind, args: Map<String, Value>) -> Result<FetchArgs> {
    let args: FetchArgs = decode(kind, args)?;
    if args.limit == Some(0) {
        return Err(AssistantError::InvalidArgument(
            "limit must be at least 1".to_string(),
        ));
    }
    Ok(args)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
