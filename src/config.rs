//! Environment-driven configuration
//!
//! Values come from the process environment (after `.env` is loaded by the
//! binaries). Missing values fall back to defaults; malformed ones are errors.

use crate::error::AssistantError;
use crate::memory::ContextConfig;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_EXPENSE_API_BASE: &str = "http://localhost:3000/api";
pub const DEFAULT_NOTES_API_BASE: &str = "http://localhost:4100";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub expense_api_base: String,
    pub expense_api_key: Option<String>,
    pub notes_api_base: String,
    pub database_url: Option<String>,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub agent: AgentConfig,
}

/// Knobs for the conversation loop
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum Reasoning/Acting cycles per turn
    pub iteration_cap: u32,
    pub reasoning_timeout: Duration,
    /// Per-call bound on each tool handler
    pub tool_timeout: Duration,
    /// Most recent messages sent to the reasoning service
    pub context_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            iteration_cap: 5,
            reasoning_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(10),
            context_window: ContextConfig::default().max_history_messages,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (keeps tests off the process env)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(*k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let defaults = AgentConfig::default();

        let agent = AgentConfig {
            iteration_cap: parse_or(get(&["ITERATION_CAP"]), "ITERATION_CAP", defaults.iteration_cap)?,
            reasoning_timeout: Duration::from_secs(parse_or(
                get(&["REASONING_TIMEOUT_SECS"]),
                "REASONING_TIMEOUT_SECS",
                defaults.reasoning_timeout.as_secs(),
            )?),
            tool_timeout: Duration::from_secs(parse_or(
                get(&["TOOL_TIMEOUT_SECS"]),
                "TOOL_TIMEOUT_SECS",
                defaults.tool_timeout.as_secs(),
            )?),
            context_window: parse_or(
                get(&["CONTEXT_WINDOW_MESSAGES"]),
                "CONTEXT_WINDOW_MESSAGES",
                defaults.context_window,
            )?,
        };

        if agent.iteration_cap == 0 {
            return Err(AssistantError::Config(
                "ITERATION_CAP must be at least 1".to_string(),
            ));
        }
        if agent.context_window == 0 {
            return Err(AssistantError::Config(
                "CONTEXT_WINDOW_MESSAGES must be at least 1".to_string(),
            ));
        }

        let cors_origins = get(&["CORS_ORIGINS"])
            .unwrap_or_else(|| "http://localhost:3000,http://localhost".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            gemini_api_key: get(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]).unwrap_or_default(),
            gemini_model: get(&["GEMINI_MODEL"]).unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            expense_api_base: get(&["EXPENSE_API_BASE"])
                .unwrap_or_else(|| DEFAULT_EXPENSE_API_BASE.to_string()),
            expense_api_key: get(&["EXPENSE_API_KEY"]),
            notes_api_base: get(&["NOTES_API_BASE"])
                .unwrap_or_else(|| DEFAULT_NOTES_API_BASE.to_string()),
            database_url: get(&["POSTGRES_URL", "DATABASE_URL"]),
            port: parse_or(get(&["PORT", "API_PORT"]), "PORT", 8000)?,
            cors_origins,
            agent,
        })
    }

    pub fn has_gemini_key(&self) -> bool {
        !self.gemini_api_key.is_empty()
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            AssistantError::Config(format!("{} has an invalid value: {}", key, raw))
        }),
    }
}
