//! Tool registry
//!
//! The set of tools is closed: every tool is a `ToolKind` variant with a
//! declared argument schema. The registry holds the enabled kinds, is shared
//! read-only across sessions, and turns raw `ToolCall`s into typed
//! `ToolCommand`s before anything is dispatched.

pub mod command;
pub mod summary;

pub use command::{
    AnalyzeArgs, CreateExpenseArgs, CreateNoteArgs, FetchArgs, ToolCommand, DEFAULT_FETCH_LIMIT,
    MAX_FETCH_LIMIT,
};

use crate::error::AssistantError;
use crate::models::ToolCall;
use crate::Result;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    CreateExpense,
    CreateNote,
    FetchExpenses,
    FetchNotes,
    Analyze,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::CreateExpense,
        ToolKind::CreateNote,
        ToolKind::FetchExpenses,
        ToolKind::FetchNotes,
        ToolKind::Analyze,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::CreateExpense => "create_expense",
            ToolKind::CreateNote => "create_note",
            ToolKind::FetchExpenses => "fetch_user_expenses",
            ToolKind::FetchNotes => "fetch_user_notes",
            ToolKind::Analyze => "analyze",
        }
    }

    /// Whether invoking this tool writes to an external collaborator
    pub fn is_write(&self) -> bool {
        matches!(self, ToolKind::CreateExpense | ToolKind::CreateNote)
    }

    pub fn spec(&self) -> ToolSpec {
        let user_id = ParamSpec::optional(
            "user_id",
            ParamType::String,
            "Id of the user; defaults to the requesting user",
        );
        let limit = ParamSpec::optional(
            "limit",
            ParamType::Integer,
            "Maximum number of records to fetch (default 20, max 100)",
        );

        match self {
            ToolKind::CreateExpense => ToolSpec::new(
                *self,
                "Create a new expense record for the user.",
                vec![
                    ParamSpec::required("amount", ParamType::Number, "Amount spent, positive"),
                    ParamSpec::optional("description", ParamType::String, "What the money was spent on"),
                    ParamSpec::optional("category", ParamType::String, "Spending category, e.g. Food"),
                    ParamSpec::optional("date", ParamType::Date, "Date of the expense, YYYY-MM-DD; defaults to today"),
                    user_id,
                ],
            ),
            ToolKind::CreateNote => ToolSpec::new(
                *self,
                "Create a new note for the user.",
                vec![
                    ParamSpec::required("text", ParamType::String, "Note text"),
                    user_id,
                ],
            ),
            ToolKind::FetchExpenses => ToolSpec::new(
                *self,
                "Fetch the user's most recent expenses with count and total.",
                vec![limit, user_id],
            ),
            ToolKind::FetchNotes => ToolSpec::new(
                *self,
                "Fetch the user's most recent notes.",
                vec![limit, user_id],
            ),
            ToolKind::Analyze => ToolSpec::new(
                *self,
                "Analyze expense and note data to provide insights. Fetch the data first, then pass it here.",
                vec![ParamSpec::required(
                    "data",
                    ParamType::String,
                    "Expense and note information to analyze",
                )],
            ),
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    /// Calendar date encoded as `YYYY-MM-DD`
    Date,
}

impl ParamType {
    /// JSON Schema type name
    pub fn schema_type(&self) -> &'static str {
        match self {
            ParamType::String | ParamType::Date => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.as_f64().map(f64::is_finite).unwrap_or(false),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Date => value
                .as_str()
                .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub param_type: ParamType,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    pub fn required(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            required: true,
            description,
        }
    }

    pub fn optional(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            required: false,
            description,
        }
    }
}

/// Declared name, description and argument schema of a tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub kind: ToolKind,
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    fn new(kind: ToolKind, description: &'static str, params: Vec<ParamSpec>) -> Self {
        Self {
            kind,
            name: kind.name(),
            description,
            params,
        }
    }

    /// JSON Schema object for the arguments, as sent to the reasoning service
    pub fn parameters_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                (
                    p.name.to_string(),
                    json!({ "type": p.param_type.schema_type(), "description": p.description }),
                )
            })
            .collect();

        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check raw arguments against the schema. `null` counts as no arguments.
    pub fn validate(&self, arguments: &Value) -> Result<Map<String, Value>> {
        let args = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(AssistantError::InvalidArgument(format!(
                    "{} expects an object of arguments, got {}",
                    self.name, other
                )))
            }
        };

        if let Some(unknown) = args
            .keys()
            .find(|key| !self.params.iter().any(|p| p.name == key.as_str()))
        {
            return Err(AssistantError::InvalidArgument(format!(
                "{} does not accept parameter '{}'",
                self.name, unknown
            )));
        }

        for param in &self.params {
            match args.get(param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(AssistantError::InvalidArgument(format!(
                        "{} requires parameter '{}'",
                        self.name, param.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.param_type.accepts(value) => {
                    return Err(AssistantError::InvalidArgument(format!(
                        "parameter '{}' of {} must be a {:?}, got {}",
                        param.name, self.name, param.param_type, value
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(args)
    }
}

/// Tool registry for looking up and decoding tool calls
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    /// Build a registry; registering the same tool twice is a configuration error.
    pub fn new(kinds: impl IntoIterator<Item = ToolKind>) -> Result<Self> {
        let mut registry = Self {
            specs: Vec::new(),
            index: HashMap::new(),
        };

        for kind in kinds {
            registry.register(kind.spec())?;
        }

        Ok(registry)
    }

    /// Registry with every supported tool enabled
    pub fn standard() -> Result<Self> {
        Self::new(ToolKind::ALL)
    }

    fn register(&mut self, spec: ToolSpec) -> Result<()> {
        if self.index.contains_key(spec.name) {
            return Err(AssistantError::Config(format!(
                "tool '{}' registered twice",
                spec.name
            )));
        }
        self.index.insert(spec.name, self.specs.len());
        self.specs.push(spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.specs.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.specs.iter().map(|s| s.name).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Resolve and validate a raw call into a typed command
    pub fn decode(&self, call: &ToolCall) -> Result<ToolCommand> {
        let spec = self.get(&call.name).ok_or_else(|| {
            AssistantError::UnknownTool(format!(
                "'{}' is not an available tool (available: {})",
                call.name,
                self.names().join(", ")
            ))
        })?;

        let args = spec.validate(&call.arguments)?;
        ToolCommand::from_validated(spec.kind, args)
    }
}
