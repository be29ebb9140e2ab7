//! Wiring shared by the binaries
//!
//! Builds the assistant from configuration, falling back to in-memory
//! collaborators and session storage when the real ones are unavailable.

use crate::agent::Assistant;
use crate::api::ServiceProbes;
use crate::config::AppConfig;
use crate::execution::ToolExecutor;
use crate::gemini::GeminiClient;
use crate::memory::{ContextConfig, ContextWindow};
use crate::reasoning::GeminiReasoner;
use crate::state::{InMemorySessionStore, PgSessionStore, SessionStore};
use crate::storage::http::DEFAULT_HTTP_TIMEOUT;
use crate::storage::{ExpenseStore, HttpExpenseStore, HttpNoteStore, InMemoryLedger, NoteStore};
use crate::tools::ToolRegistry;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Components {
    pub assistant: Arc<Assistant>,
    pub probes: ServiceProbes,
}

struct Collaborators {
    expenses: Arc<dyn ExpenseStore>,
    notes: Arc<dyn NoteStore>,
    expense_api: Option<HttpExpenseStore>,
    notes_api: Option<HttpNoteStore>,
}

pub async fn build(config: &AppConfig) -> Result<Components> {
    if !config.has_gemini_key() {
        warn!("⚠️  GEMINI_API_KEY not set; every turn will end with a reasoning error");
    }

    let gemini = Arc::new(GeminiClient::new(
        config.gemini_api_key.as_str(),
        config.gemini_model.as_str(),
    )?);
    let registry = Arc::new(ToolRegistry::standard()?);
    let collaborators = collaborators(config).await?;

    let executor = ToolExecutor::new(
        registry,
        collaborators.expenses,
        collaborators.notes,
        gemini.clone(),
    )
    .with_tool_timeout(config.agent.tool_timeout);

    let assistant = Assistant::new(
        Arc::new(
            GeminiReasoner::new(gemini.clone()).with_window(ContextWindow::with_config(
                ContextConfig {
                    max_history_messages: config.agent.context_window,
                },
            )),
        ),
        Arc::new(executor),
        session_store(config),
        config.agent.clone(),
    );

    info!(
        model = %config.gemini_model,
        iteration_cap = config.agent.iteration_cap,
        context_window = config.agent.context_window,
        "✅ Assistant initialized"
    );

    Ok(Components {
        assistant: Arc::new(assistant),
        probes: ServiceProbes {
            gemini: Some(gemini),
            expense_api: collaborators.expense_api,
            notes_api: collaborators.notes_api,
        },
    })
}

async fn collaborators(config: &AppConfig) -> Result<Collaborators> {
    let expense_api = HttpExpenseStore::new(
        &config.expense_api_base,
        config.expense_api_key.clone(),
        DEFAULT_HTTP_TIMEOUT,
    )?;
    let notes_api = HttpNoteStore::new(&config.notes_api_base, DEFAULT_HTTP_TIMEOUT)?;

    let (expense_ok, notes_ok) = tokio::join!(expense_api.ping(), notes_api.ping());

    if expense_ok && notes_ok {
        info!(
            expense_api = %config.expense_api_base,
            notes_api = %config.notes_api_base,
            "Collaborator APIs reachable"
        );
        return Ok(Collaborators {
            expenses: Arc::new(expense_api.clone()),
            notes: Arc::new(notes_api.clone()),
            expense_api: Some(expense_api),
            notes_api: Some(notes_api),
        });
    }

    warn!(
        expense_api = expense_ok,
        notes_api = notes_ok,
        "Collaborator APIs unreachable, falling back to the in-memory ledger"
    );
    let ledger = InMemoryLedger::new();
    Ok(Collaborators {
        expenses: Arc::new(ledger.clone()),
        notes: Arc::new(ledger),
        expense_api: None,
        notes_api: None,
    })
}

fn session_store(config: &AppConfig) -> Arc<dyn SessionStore> {
    if let Some(url) = &config.database_url {
        match PgSessionStore::connect_lazy(url) {
            Ok(store) => return Arc::new(store),
            Err(e) => warn!(
                "Failed to initialize postgres session store, falling back to in-memory: {}",
                e
            ),
        }
    }

    info!("Session store backend: in-memory");
    Arc::new(InMemorySessionStore::new())
}
