//! Tool executor
//!
//! Turns a batch of tool calls into the same number of results, in order.
//! Nothing here fails the batch: every problem becomes a `ToolResult` error
//! that goes back to the reasoning service.

use crate::analysis::Analyst;
use crate::error::AssistantError;
use crate::models::{NewExpense, ToolCall, ToolErrorKind, ToolResult};
use crate::storage::{ExpenseStore, NoteStore};
use crate::tools::{summary, ToolCommand, ToolRegistry};
use crate::Result;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Who the batch runs on behalf of
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
}

impl ToolContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    expenses: Arc<dyn ExpenseStore>,
    notes: Arc<dyn NoteStore>,
    analyst: Arc<dyn Analyst>,
    tool_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        expenses: Arc<dyn ExpenseStore>,
        notes: Arc<dyn NoteStore>,
        analyst: Arc<dyn Analyst>,
    ) -> Self {
        Self {
            registry,
            expenses,
            notes,
            analyst,
            tool_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run every call concurrently; result `i` answers `calls[i]`
    pub async fn execute(&self, ctx: &ToolContext, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.execute_one(ctx, call))).await
    }

    async fn execute_one(&self, ctx: &ToolContext, call: &ToolCall) -> ToolResult {
        let start = Instant::now();

        // -------------------------------------------------
        // 1️⃣ RESOLVE + VALIDATE (no collaborator is touched on failure)
        // -------------------------------------------------
        let outcome = match self.prepare(ctx, call) {
            Err(e) => Err(e),
            // -------------------------------------------------
            // 2️⃣ DISPATCH under the per-call timeout
            // -------------------------------------------------
            Ok(command) => {
                if command.kind().is_write() {
                    info!(tool_name = %call.name, user_id = %ctx.user_id, "writing to collaborator");
                }
                match tokio::time::timeout(self.tool_timeout, self.dispatch(&ctx.user_id, command))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AssistantError::HandlerFailure(format!(
                        "{} timed out after {}s",
                        call.name,
                        self.tool_timeout.as_secs_f32()
                    ))),
                }
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(summary) => {
                debug!(tool_name = %call.name, call_id = %call.call_id, elapsed_ms, "tool succeeded");
                ToolResult::success(call, summary)
            }
            Err(e) => {
                let (kind, message) = tool_error(e);
                warn!(
                    tool_name = %call.name,
                    call_id = %call.call_id,
                    %kind,
                    elapsed_ms,
                    "tool failed: {}",
                    message
                );
                ToolResult::error(call, kind, message)
            }
        }
    }

    fn prepare(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolCommand> {
        let command = self.registry.decode(call)?;

        if let Some(requested) = command.requested_user() {
            if requested != ctx.user_id {
                return Err(AssistantError::InvalidArgument(format!(
                    "user_id '{}' does not match the requesting user",
                    requested
                )));
            }
        }

        Ok(command)
    }

    async fn dispatch(&self, user_id: &str, command: ToolCommand) -> Result<String> {
        match command {
            ToolCommand::CreateExpense(args) => {
                let record = self
                    .expenses
                    .create(NewExpense {
                        user_id: user_id.to_string(),
                        amount: args.amount,
                        description: args.description(),
                        category: args.category(),
                        date: args.date,
                    })
                    .await?;
                Ok(summary::expense_created(&record))
            }
            ToolCommand::CreateNote(args) => {
                let note = self.notes.create(user_id, args.text.trim()).await?;
                Ok(summary::note_created(&note))
            }
            ToolCommand::FetchExpenses(args) => {
                let records = self.expenses.list(user_id, args.limit()).await?;
                Ok(summary::expenses(&records))
            }
            ToolCommand::FetchNotes(args) => {
                let notes = self.notes.list(user_id, args.limit()).await?;
                Ok(summary::notes(&notes))
            }
            ToolCommand::Analyze(args) => self.analyst.analyze(&args.data).await,
        }
    }
}

/// Map an error onto the tool-level kind and a readable message
fn tool_error(error: AssistantError) -> (ToolErrorKind, String) {
    match error {
        AssistantError::InvalidArgument(m) => (ToolErrorKind::InvalidArgument, m),
        AssistantError::UnknownTool(m) => (ToolErrorKind::UnknownTool, m),
        AssistantError::HandlerFailure(m) => (ToolErrorKind::HandlerFailure, m),
        other => (ToolErrorKind::HandlerFailure, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExpenseRecord, Note};
    use crate::storage::InMemoryLedger;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoAnalyst;

    #[async_trait]
    impl Analyst for EchoAnalyst {
        async fn analyze(&self, data: &str) -> Result<String> {
            Ok(format!("📌 Key Findings\n{}", data))
        }
    }

    struct DownStore;

    #[async_trait]
    impl ExpenseStore for DownStore {
        async fn create(&self, _expense: NewExpense) -> Result<ExpenseRecord> {
            Err(AssistantError::Storage("/expenses returned 503".into()))
        }

        async fn list(&self, _user_id: &str, _limit: u32) -> Result<Vec<ExpenseRecord>> {
            Err(AssistantError::Storage("/fetchExpenses returned 503".into()))
        }
    }

    struct SlowNotes;

    #[async_trait]
    impl NoteStore for SlowNotes {
        async fn create(&self, _user_id: &str, _text: &str) -> Result<Note> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(AssistantError::Storage("unreachable".into()))
        }

        async fn list(&self, _user_id: &str, _limit: u32) -> Result<Vec<Note>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn executor(ledger: &InMemoryLedger) -> ToolExecutor {
        ToolExecutor::new(
            Arc::new(ToolRegistry::standard().unwrap()),
            Arc::new(ledger.clone()),
            Arc::new(ledger.clone()),
            Arc::new(EchoAnalyst),
        )
    }

    #[tokio::test]
    async fn test_results_match_requests_in_order() {
        let ledger = InMemoryLedger::new();
        let calls = vec![
            ToolCall::new("create_note", json!({"text": "budget is $400"})),
            ToolCall::new("delete_expense", json!({})),
            ToolCall::new("fetch_user_notes", json!({})),
            ToolCall::new("analyze", json!({"data": "Found 0 expense(s)"})),
        ];

        let results = executor(&ledger).execute(&ToolContext::new("u1"), &calls).await;

        assert_eq!(results.len(), calls.len());
        for (call, result) in calls.iter().zip(&results) {
            assert_eq!(call.call_id, result.call_id);
            assert_eq!(call.name, result.tool_name);
        }
        assert!(!results[0].is_error());
        assert_eq!(results[1].error_kind(), Some(ToolErrorKind::UnknownTool));
        assert!(results[3].content().contains("Key Findings"));
    }

    #[tokio::test]
    async fn test_empty_fetch_literal() {
        let ledger = InMemoryLedger::new();
        let results = executor(&ledger)
            .execute(
                &ToolContext::new("u1"),
                &[ToolCall::new("fetch_user_expenses", json!({}))],
            )
            .await;
        assert_eq!(results[0].content(), "No expenses found for this user.");
    }

    #[tokio::test]
    async fn test_create_then_fetch_surfaces_record() {
        let ledger = InMemoryLedger::new();
        let exec = executor(&ledger);
        let ctx = ToolContext::new("u1");

        exec.execute(
            &ctx,
            &[ToolCall::new(
                "create_expense",
                json!({"amount": 4.75, "description": "coffee", "category": "food", "date": "2025-09-20"}),
            )],
        )
        .await;

        let fetched = exec
            .execute(&ctx, &[ToolCall::new("fetch_user_expenses", json!({"limit": 5}))])
            .await;
        let content = fetched[0].content();
        assert!(content.starts_with("Found 1 expense(s) totaling 4.75"));
        assert!(content.contains("2025-09-20 | 4.75 | coffee (Food)"));
    }

    #[tokio::test]
    async fn test_rejected_calls_do_not_touch_state() {
        let ledger = InMemoryLedger::new();
        let calls = vec![
            ToolCall::new("create_expense", json!({"amount": "12"})),
            ToolCall::new("create_expense", json!({"amount": 12.0, "user_id": "someone-else"})),
            ToolCall::new("create_expense_v2", json!({"amount": 12.0})),
        ];

        let results = executor(&ledger).execute(&ToolContext::new("u1"), &calls).await;

        assert_eq!(results[0].error_kind(), Some(ToolErrorKind::InvalidArgument));
        assert_eq!(results[1].error_kind(), Some(ToolErrorKind::InvalidArgument));
        assert_eq!(results[2].error_kind(), Some(ToolErrorKind::UnknownTool));
        assert_eq!(ledger.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_collaborator_failure_is_handler_failure() {
        let exec = ToolExecutor::new(
            Arc::new(ToolRegistry::standard().unwrap()),
            Arc::new(DownStore),
            Arc::new(InMemoryLedger::new()),
            Arc::new(EchoAnalyst),
        );

        let results = exec
            .execute(
                &ToolContext::new("u1"),
                &[
                    ToolCall::new("fetch_user_expenses", json!({})),
                    ToolCall::new("fetch_user_notes", json!({})),
                ],
            )
            .await;

        assert_eq!(results[0].error_kind(), Some(ToolErrorKind::HandlerFailure));
        assert!(results[0].content().contains("503"));
        assert!(!results[1].is_error());
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let exec = ToolExecutor::new(
            Arc::new(ToolRegistry::standard().unwrap()),
            Arc::new(InMemoryLedger::new()),
            Arc::new(SlowNotes),
            Arc::new(EchoAnalyst),
        )
        .with_tool_timeout(Duration::from_millis(20));

        let results = exec
            .execute(
                &ToolContext::new("u1"),
                &[ToolCall::new("fetch_user_notes", json!({}))],
            )
            .await;

        assert_eq!(results[0].error_kind(), Some(ToolErrorKind::HandlerFailure));
        assert!(results[0].content().contains("timed out"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let ledger = InMemoryLedger::new();
        assert!(executor(&ledger).execute(&ToolContext::new("u1"), &[]).await.is_empty());
    }
}
