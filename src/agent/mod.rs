//! Conversation loop
//!
//! START → REASONING → (ACTING → REASONING)* → DONE
//!
//! History is committed to the session store only at consistent points: after
//! an Acting phase (the tool request together with all of its results) and at
//! the final reply. A turn cut short never leaves an unanswered tool call.

pub mod events;

pub use events::{AgentEvent, TurnStatus};

use crate::config::AgentConfig;
use crate::error::AssistantError;
use crate::execution::{ToolContext, ToolExecutor};
use crate::memory::Session;
use crate::models::{AssistantTurn, Message, ToolCall, ToolResult};
use crate::reasoning::ReasoningClient;
use crate::state::{SessionLocks, SessionStore};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const ITERATION_CAP_REPLY: &str = "I wasn't able to finish that request within the allowed number of steps. Please try again, or break it into smaller requests.";
pub const REASONING_FAILURE_REPLY: &str = "Sorry, I ran into a problem while working on that. Please try again in a moment.";
pub const INTERNAL_ERROR_REPLY: &str = "Sorry, something went wrong while running the requested tools. Please try again.";

/// Default session id for a user who did not name one
pub fn default_session_id(user_id: &str) -> String {
    format!("user-{}-thread", user_id)
}

/// One human message to run through the loop
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: String,
    pub message: String,
    pub session_id: Option<String>,
    pub cancel: CancellationToken,
}

impl TurnRequest {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            message: message.into(),
            session_id: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn session_id(&self) -> String {
        self.session_id
            .clone()
            .unwrap_or_else(|| default_session_id(self.user_id.trim()))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TurnOutcome {
    pub session_id: String,
    pub reply: String,
    pub status: TurnStatus,
    /// Reasoning calls made
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

enum LoopState {
    Reasoning,
    Acting(Vec<ToolCall>),
    Done(Completion),
}

struct Completion {
    reply: String,
    status: TurnStatus,
    error: Option<AssistantError>,
}

impl Completion {
    fn reply(text: String) -> Self {
        Self {
            reply: text,
            status: TurnStatus::Completed,
            error: None,
        }
    }

    fn iteration_cap() -> Self {
        Self {
            reply: ITERATION_CAP_REPLY.to_string(),
            status: TurnStatus::IterationCap,
            error: None,
        }
    }

    fn failed(reply: &str, error: AssistantError) -> Self {
        Self {
            reply: reply.to_string(),
            status: TurnStatus::Failed,
            error: Some(error),
        }
    }

    fn cancelled() -> Self {
        Self {
            reply: String::new(),
            status: TurnStatus::Cancelled,
            error: Some(AssistantError::Cancelled),
        }
    }
}

/// Explicit context for running turns: no globals
pub struct Assistant {
    reasoner: Arc<dyn ReasoningClient>,
    executor: Arc<ToolExecutor>,
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    config: AgentConfig,
}

impl Assistant {
    pub fn new(
        reasoner: Arc<dyn ReasoningClient>,
        executor: Arc<ToolExecutor>,
        store: Arc<dyn SessionStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            reasoner,
            executor,
            store,
            locks: SessionLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one turn to completion.
    ///
    /// Errors are returned only for requests that never start (blank input,
    /// unreadable history). Everything after that ends in a `TurnOutcome`.
    pub async fn run(&self, request: TurnRequest) -> Result<TurnOutcome> {
        self.drive(request, None).await
    }

    /// Same as `run`, pushing every transition to `events`
    pub async fn run_streaming(
        &self,
        request: TurnRequest,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<TurnOutcome> {
        let outcome = self.drive(request, Some(&events)).await;
        if let Err(e) = &outcome {
            emit(Some(&events), AgentEvent::Error { content: e.to_string() }).await;
        }
        outcome
    }

    async fn drive(
        &self,
        request: TurnRequest,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<TurnOutcome> {
        let user_id = request.user_id.trim().to_string();
        let message = request.message.trim().to_string();
        if user_id.is_empty() {
            return Err(AssistantError::InvalidArgument("user_id is required".to_string()));
        }
        if message.is_empty() {
            return Err(AssistantError::InvalidArgument("message is required".to_string()));
        }

        let session_id = request.session_id();
        let cancel = request.cancel.clone();
        let started = Instant::now();

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.cancelled_before_start(&session_id, events).await),
            guard = self.locks.acquire(&session_id) => guard,
        };

        let mut session = Session::restore(&session_id, self.store.get(&session_id).await?)?;
        let mut committed = session.len();

        info!(%session_id, %user_id, "turn started");
        emit(events, AgentEvent::Start { session_id: session_id.clone() }).await;

        // -------------------------------------------------
        // START: seed with the tagged human message
        // -------------------------------------------------
        session.push(Message::human(format!("[User ID: {}] {}", user_id, message)))?;

        let ctx = ToolContext::new(user_id);
        let cap = self.config.iteration_cap;
        let mut iterations: u32 = 0;
        let mut state = LoopState::Reasoning;

        let mut completion = loop {
            state = match state {
                // -------------------------------------------------
                // REASONING
                // -------------------------------------------------
                LoopState::Reasoning => {
                    if iterations >= cap {
                        warn!(%session_id, cap, "iteration cap reached");
                        LoopState::Done(Completion::iteration_cap())
                    } else {
                        iterations += 1;
                        debug!(%session_id, iteration = iterations, "reasoning");

                        match self.reason(&session, &cancel).await {
                            Ok(AssistantTurn::FinalReply(text)) => {
                                LoopState::Done(Completion::reply(text))
                            }
                            Ok(AssistantTurn::ToolRequest(calls)) if calls.is_empty() => {
                                LoopState::Done(Completion::reply(String::new()))
                            }
                            Ok(AssistantTurn::ToolRequest(calls)) => LoopState::Acting(calls),
                            Err(AssistantError::Cancelled) => {
                                LoopState::Done(Completion::cancelled())
                            }
                            Err(e) => {
                                error!(%session_id, iteration = iterations, error = %e, "reasoning failed");
                                LoopState::Done(Completion::failed(REASONING_FAILURE_REPLY, e))
                            }
                        }
                    }
                }

                // -------------------------------------------------
                // ACTING
                // -------------------------------------------------
                LoopState::Acting(calls) => {
                    info!(
                        %session_id,
                        iteration = iterations,
                        tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                        "executing tools"
                    );
                    emit(
                        events,
                        AgentEvent::ToolCall {
                            iteration: iterations,
                            tools: calls.clone(),
                        },
                    )
                    .await;

                    let results = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        results = self.executor.execute(&ctx, &calls) => Some(results),
                    };

                    match results {
                        None => LoopState::Done(Completion::cancelled()),
                        Some(results) => {
                            emit(events, AgentEvent::ToolResult { outputs: results.clone() }).await;

                            match record_cycle(&mut session, calls, &results) {
                                Err(e) => {
                                    error!(%session_id, error = %e, "tool results do not match the request");
                                    LoopState::Done(Completion::failed(INTERNAL_ERROR_REPLY, e))
                                }
                                Ok(()) => match self.commit(&session, &mut committed).await {
                                    Ok(()) => LoopState::Reasoning,
                                    Err(e) => LoopState::Done(Completion::failed(
                                        REASONING_FAILURE_REPLY,
                                        e,
                                    )),
                                },
                            }
                        }
                    }
                }

                LoopState::Done(completion) => break completion,
            };
        };

        // -------------------------------------------------
        // DONE
        // -------------------------------------------------
        if completion.status != TurnStatus::Cancelled {
            let committed_reply = match session.push(Message::assistant(completion.reply.clone())) {
                Ok(()) => self.commit(&session, &mut committed).await,
                Err(e) => Err(e),
            };

            if let Err(e) = committed_reply {
                error!(%session_id, error = %e, "failed to commit final reply");
                if completion.error.is_none() {
                    completion.status = TurnStatus::Failed;
                    completion.error = Some(e);
                }
            }
        }

        let outcome = TurnOutcome {
            session_id: session_id.clone(),
            reply: completion.reply,
            status: completion.status,
            iterations,
            error: completion.error.map(|e| e.to_string()),
        };

        info!(
            %session_id,
            status = ?outcome.status,
            iterations,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn finished"
        );

        match &outcome.error {
            Some(content) if outcome.status != TurnStatus::Completed => {
                if !outcome.reply.is_empty() {
                    emit(events, AgentEvent::Token { content: outcome.reply.clone() }).await;
                }
                emit(events, AgentEvent::Error { content: content.clone() }).await;
            }
            _ => {
                emit(events, AgentEvent::Token { content: outcome.reply.clone() }).await;
                emit(
                    events,
                    AgentEvent::End {
                        session_id: session_id.clone(),
                        status: outcome.status,
                    },
                )
                .await;
            }
        }

        Ok(outcome)
    }

    async fn reason(&self, session: &Session, cancel: &CancellationToken) -> Result<AssistantTurn> {
        let step = self.reasoner.step(session.messages(), self.executor.registry());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AssistantError::Cancelled),
            result = tokio::time::timeout(self.config.reasoning_timeout, step) => {
                result.unwrap_or_else(|_| {
                    Err(AssistantError::Timeout(format!(
                        "reasoning service did not answer within {}s",
                        self.config.reasoning_timeout.as_secs_f32()
                    )))
                })
            }
        }
    }

    async fn commit(&self, session: &Session, committed: &mut usize) -> Result<()> {
        let pending = session.since(*committed);
        if pending.is_empty() {
            return Ok(());
        }

        self.store
            .append_all(session.id(), pending.to_vec())
            .await?;
        debug!(session_id = session.id(), messages = pending.len(), "committed");
        *committed = session.len();
        Ok(())
    }

    async fn cancelled_before_start(
        &self,
        session_id: &str,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> TurnOutcome {
        info!(%session_id, "turn cancelled while waiting for the session");
        emit(events, AgentEvent::Error { content: AssistantError::Cancelled.to_string() }).await;
        TurnOutcome {
            session_id: session_id.to_string(),
            reply: String::new(),
            status: TurnStatus::Cancelled,
            iterations: 0,
            error: Some(AssistantError::Cancelled.to_string()),
        }
    }
}

/// Append a tool request and its results, checking they pair up one-to-one in order
fn record_cycle(session: &mut Session, calls: Vec<ToolCall>, results: &[ToolResult]) -> Result<()> {
    if results.len() != calls.len() {
        return Err(AssistantError::Internal(format!(
            "executor returned {} result(s) for {} call(s)",
            results.len(),
            calls.len()
        )));
    }

    if let Some((call, result)) = calls
        .iter()
        .zip(results)
        .find(|(call, result)| call.call_id != result.call_id)
    {
        return Err(AssistantError::Internal(format!(
            "result '{}' answers the wrong call (expected '{}')",
            result.call_id, call.call_id
        )));
    }

    let mut staged = session.clone();
    staged.push(Message::tool_request(calls))?;
    for result in results {
        staged.push(Message::tool_result(result))?;
    }
    *session = staged;
    Ok(())
}

async fn emit(events: Option<&mpsc::Sender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = events {
        // a gone receiver must not stop the turn from committing
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analyst;
    use crate::models::Role;
    use crate::reasoning::ScriptedReasoner;
    use crate::state::InMemorySessionStore;
    use crate::storage::InMemoryLedger;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct EchoAnalyst;

    #[async_trait]
    impl Analyst for EchoAnalyst {
        async fn analyze(&self, data: &str) -> Result<String> {
            Ok(format!("Key Findings: {}", data))
        }
    }

    struct Harness {
        assistant: Arc<Assistant>,
        reasoner: Arc<ScriptedReasoner>,
        store: InMemorySessionStore,
        ledger: InMemoryLedger,
    }

    fn harness(reasoner: ScriptedReasoner, cap: u32) -> Harness {
        harness_with(
            reasoner,
            AgentConfig {
                iteration_cap: cap,
                ..AgentConfig::default()
            },
        )
    }

    fn harness_with(reasoner: ScriptedReasoner, config: AgentConfig) -> Harness {
        let reasoner = Arc::new(reasoner);
        let ledger = InMemoryLedger::new();
        let store = InMemorySessionStore::new();

        let executor = ToolExecutor::new(
            Arc::new(ToolRegistry::standard().unwrap()),
            Arc::new(ledger.clone()),
            Arc::new(ledger.clone()),
            Arc::new(EchoAnalyst),
        );

        Harness {
            assistant: Arc::new(Assistant::new(
                reasoner.clone(),
                Arc::new(executor),
                Arc::new(store.clone()),
                config,
            )),
            reasoner,
            store,
            ledger,
        }
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new(name, args)
    }

    async fn collect_events(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|event| match event {
                AgentEvent::Start { .. } => "start",
                AgentEvent::ToolCall { .. } => "tool_call",
                AgentEvent::ToolResult { .. } => "tool_result",
                AgentEvent::Token { .. } => "token",
                AgentEvent::End { .. } => "end",
                AgentEvent::Error { .. } => "error",
            })
            .collect()
    }

    fn assert_no_unanswered_calls(history: Vec<Message>) {
        assert!(Session::restore("check", history).unwrap().pending_calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_expense_turn() {
        let h = harness(
            ScriptedReasoner::new(vec![
                AssistantTurn::ToolRequest(vec![call(
                    "create_expense",
                    json!({"amount": 4.5, "description": "coffee", "category": "Food"}),
                )]),
                AssistantTurn::FinalReply("Recorded your coffee expense of $4.50.".into()),
            ]),
            5,
        );

        let outcome = h
            .assistant
            .run(TurnRequest::new("u1", "I spent 4.50 on coffee"))
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert!(outcome.reply.contains("4.50"));
        assert_eq!(outcome.session_id, "user-u1-thread");
        assert_eq!(h.ledger.record_count().await, 1);

        let history = h.store.get("user-u1-thread").await.unwrap();
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::Human, Role::Assistant, Role::ToolResult, Role::Assistant]
        );
        assert_eq!(history[0].content, "[User ID: u1] I spent 4.50 on coffee");
        assert_eq!(history[2].call_id.as_deref(), Some(history[1].tool_calls[0].call_id.as_str()));
    }

    #[tokio::test]
    async fn test_empty_fetch_feeds_literal_back() {
        let h = harness(
            ScriptedReasoner::new(vec![
                AssistantTurn::ToolRequest(vec![call("fetch_user_expenses", json!({}))]),
                AssistantTurn::FinalReply("You have no expenses yet.".into()),
            ]),
            5,
        );

        h.assistant
            .run(TurnRequest::new("u1", "show my expenses"))
            .await
            .unwrap();

        let second_call = &h.reasoner.histories().await[1];
        let result = second_call.last().unwrap();
        assert_eq!(result.role, Role::ToolResult);
        assert_eq!(result.content, "No expenses found for this user.");
    }

    #[tokio::test]
    async fn test_unknown_tool_continues_loop() {
        let h = harness(
            ScriptedReasoner::new(vec![
                AssistantTurn::ToolRequest(vec![call("delete_expense", json!({"id": "exp_1"}))]),
                AssistantTurn::FinalReply("Sorry, I can't delete expenses.".into()),
            ]),
            5,
        );

        let outcome = h
            .assistant
            .run(TurnRequest::new("u1", "delete my last expense"))
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(h.reasoner.calls(), 2);
        let seen = &h.reasoner.histories().await[1];
        assert!(seen.last().unwrap().content.starts_with("Error (unknown_tool)"));
    }

    #[tokio::test]
    async fn test_iteration_cap_stops_reasoning() {
        let h = harness(
            ScriptedReasoner::repeating(AssistantTurn::ToolRequest(vec![call(
                "fetch_user_notes",
                json!({}),
            )])),
            5,
        );

        let outcome = h
            .assistant
            .run(TurnRequest::new("u1", "loop forever"))
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::IterationCap);
        assert_eq!(outcome.reply, ITERATION_CAP_REPLY);
        assert_eq!(outcome.iterations, 5);
        assert_eq!(h.reasoner.calls(), 5);

        // human + 5 × (request + result) + fallback
        let history = h.store.get("user-u1-thread").await.unwrap();
        assert_eq!(history.len(), 12);
        assert_no_unanswered_calls(history);
    }

    #[tokio::test]
    async fn test_empty_reply_is_final() {
        let h = harness(ScriptedReasoner::new(vec![AssistantTurn::FinalReply(String::new())]), 5);
        let outcome = h.assistant.run(TurnRequest::new("u1", "hi")).await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.reply, "");
    }

    #[tokio::test]
    async fn test_reasoning_failure_apologizes_and_keeps_progress() {
        let h = harness(
            ScriptedReasoner::with_outcomes(vec![
                Ok(AssistantTurn::ToolRequest(vec![call("create_note", json!({"text": "rent due"}))])),
                Err(AssistantError::ReasoningService("malformed output".into())),
            ]),
            5,
        );

        let outcome = h.assistant.run(TurnRequest::new("u1", "note rent")).await.unwrap();

        assert_eq!(outcome.status, TurnStatus::Failed);
        assert_eq!(outcome.reply, REASONING_FAILURE_REPLY);
        assert!(outcome.error.unwrap().contains("malformed output"));

        let history = h.store.get("user-u1-thread").await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].content, REASONING_FAILURE_REPLY);
        assert_eq!(h.ledger.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_blank_input_rejected() {
        let h = harness(ScriptedReasoner::new(vec![]), 5);
        let result = h.assistant.run(TurnRequest::new("u1", "   ")).await;
        assert!(matches!(result, Err(AssistantError::InvalidArgument(_))));
        assert_eq!(h.reasoner.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_reasoning_keeps_committed_cycle() {
        let h = harness(
            ScriptedReasoner::new(vec![
                AssistantTurn::ToolRequest(vec![call("fetch_user_notes", json!({}))]),
                AssistantTurn::FinalReply("never delivered".into()),
            ])
            .with_delay(Duration::from_millis(150)),
            5,
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(225)).await;
            trigger.cancel();
        });

        let outcome = h
            .assistant
            .run(TurnRequest::new("u1", "notes?").with_cancel(cancel))
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Cancelled);
        let history = h.store.get("user-u1-thread").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_no_unanswered_calls(history);
    }

    #[tokio::test]
    async fn test_cancel_before_any_commit_writes_nothing() {
        let h = harness(
            ScriptedReasoner::new(vec![AssistantTurn::FinalReply("late".into())])
                .with_delay(Duration::from_millis(200)),
            5,
        );

        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h
            .assistant
            .run(TurnRequest::new("u1", "hi").with_cancel(cancel))
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Cancelled);
        assert_eq!(h.store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_same_session_turns_are_serialized() {
        let h = harness(
            ScriptedReasoner::new(vec![
                AssistantTurn::FinalReply("first".into()),
                AssistantTurn::FinalReply("second".into()),
            ])
            .with_delay(Duration::from_millis(50)),
            5,
        );

        let a = {
            let assistant = h.assistant.clone();
            tokio::spawn(async move { assistant.run(TurnRequest::new("u1", "one")).await })
        };
        let b = {
            let assistant = h.assistant.clone();
            tokio::spawn(async move { assistant.run(TurnRequest::new("u1", "two")).await })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // the second turn saw the first turn's committed history
        let histories = h.reasoner.histories().await;
        assert_eq!(histories[0].len(), 1);
        assert_eq!(histories[1].len(), 3);
        assert_eq!(h.store.get("user-u1-thread").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_streaming_event_order() {
        let h = harness(
            ScriptedReasoner::new(vec![
                AssistantTurn::ToolRequest(vec![call("fetch_user_notes", json!({}))]),
                AssistantTurn::FinalReply("No notes yet.".into()),
            ]),
            5,
        );

        let (tx, rx) = mpsc::channel(32);
        let outcome = h
            .assistant
            .run_streaming(TurnRequest::new("u1", "notes?").with_session(Some("s-42".into())), tx)
            .await
            .unwrap();
        assert_eq!(outcome.session_id, "s-42");

        let events = collect_events(rx).await;
        assert_eq!(kinds(&events), vec!["start", "tool_call", "tool_result", "token", "end"]);
    }

    #[tokio::test]
    async fn test_streaming_failed_turn_ends_with_error() {
        let h = harness(
            ScriptedReasoner::with_outcomes(vec![Err(AssistantError::ReasoningService(
                "bad function call".into(),
            ))]),
            5,
        );

        let (tx, rx) = mpsc::channel(32);
        let outcome = h
            .assistant
            .run_streaming(TurnRequest::new("u1", "hi"), tx)
            .await
            .unwrap();
        assert_eq!(outcome.status, TurnStatus::Failed);

        let events = collect_events(rx).await;
        assert_eq!(kinds(&events), vec!["start", "token", "error"]);
        assert!(matches!(
            &events[1],
            AgentEvent::Token { content } if content == REASONING_FAILURE_REPLY
        ));
        assert!(matches!(
            &events[2],
            AgentEvent::Error { content } if content.contains("bad function call")
        ));
    }

    #[tokio::test]
    async fn test_streaming_iteration_cap_ends_with_end() {
        let h = harness(
            ScriptedReasoner::repeating(AssistantTurn::ToolRequest(vec![call(
                "fetch_user_notes",
                json!({}),
            )])),
            2,
        );

        let (tx, rx) = mpsc::channel(32);
        h.assistant
            .run_streaming(TurnRequest::new("u1", "loop"), tx)
            .await
            .unwrap();

        let events = collect_events(rx).await;
        assert_eq!(
            kinds(&events),
            vec!["start", "tool_call", "tool_result", "tool_call", "tool_result", "token", "end"]
        );
        assert_eq!(
            events.last(),
            Some(&AgentEvent::End {
                session_id: "user-u1-thread".into(),
                status: TurnStatus::IterationCap,
            })
        );
    }

    #[tokio::test]
    async fn test_reasoning_timeout_is_a_failed_turn() {
        let h = harness_with(
            ScriptedReasoner::new(vec![AssistantTurn::FinalReply("too late".into())])
                .with_delay(Duration::from_millis(200)),
            AgentConfig {
                reasoning_timeout: Duration::from_millis(30),
                ..AgentConfig::default()
            },
        );

        let outcome = h.assistant.run(TurnRequest::new("u1", "hi")).await.unwrap();

        assert_eq!(outcome.status, TurnStatus::Failed);
        assert_eq!(outcome.reply, REASONING_FAILURE_REPLY);
        assert!(outcome.error.unwrap().contains("within 0.03s"));

        let history = h.store.get("user-u1-thread").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, REASONING_FAILURE_REPLY);
    }

    #[test]
    fn test_record_cycle_rejects_mismatch() {
        let mut session = Session::new("s1");
        session.push(Message::human("hi")).unwrap();
        let calls = vec![call("fetch_user_notes", json!({}))];

        let err = record_cycle(&mut session, calls.clone(), &[]).unwrap_err();
        assert!(matches!(err, AssistantError::Internal(_)));
        assert_eq!(session.len(), 1);

        let other = ToolResult::success(&call("fetch_user_notes", json!({})), "x".into());
        assert!(record_cycle(&mut session, calls, &[other]).is_err());
        assert_eq!(session.len(), 1);
    }
}
