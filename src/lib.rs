//! Finance Assistant
//!
//! A conversational assistant that records and analyzes personal expenses and
//! notes by letting a reasoning service call a closed set of tools:
//! - Typed tool registry with schema validation
//! - Order-preserving concurrent tool execution
//! - Session history committed only at consistent points
//! - JSON and NDJSON streaming HTTP transport
//!
//! CONVERSATION LOOP:
//! START → REASONING → (ACTING → REASONING)* → DONE

pub mod agent;
pub mod analysis;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod execution;
pub mod gemini;
pub mod memory;
pub mod models;
pub mod reasoning;
pub mod state;
pub mod storage;
pub mod tools;

pub use error::{AssistantError, Result};

// Re-export common types
pub use agent::{AgentEvent, Assistant, TurnOutcome, TurnRequest, TurnStatus};
pub use config::{AgentConfig, AppConfig};
pub use models::*;
