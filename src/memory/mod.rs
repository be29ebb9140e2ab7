//! Conversation memory
//!
//! Session history with its pairing invariants, and the window of it that is
//! sent to the reasoning service.

pub mod context_manager;
pub mod session;

pub use context_manager::{ContextConfig, ContextWindow};
pub use session::Session;
