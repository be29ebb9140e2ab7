//! REST API server for the finance assistant
//!
//! GET  /             → running status
//! GET  /health       → reasoning service + collaborator connectivity
//! POST /chat         → one turn, JSON reply
//! POST /chat/stream  → one turn, newline-delimited JSON events

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::agent::{Assistant, TurnRequest, TurnStatus};
use crate::error::AssistantError;
use crate::gemini::GeminiClient;
use crate::storage::{HttpExpenseStore, HttpNoteStore};

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ChatRequest {
    fn validate(&self) -> Result<(), String> {
        if self.user_id.trim().is_empty() || self.message.trim().is_empty() {
            return Err("user_id and message are required.".to_string());
        }
        Ok(())
    }

    fn into_turn(self) -> TurnRequest {
        TurnRequest::new(self.user_id, self.message).with_session(self.session_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ApiResponse::error(message))).into_response()
}

/// =============================
/// API State
/// =============================

/// Live dependencies probed by `/health`. `None` means an in-memory stand-in.
#[derive(Clone, Default)]
pub struct ServiceProbes {
    pub gemini: Option<Arc<GeminiClient>>,
    pub expense_api: Option<HttpExpenseStore>,
    pub notes_api: Option<HttpNoteStore>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub status: String,
    pub dependencies: Dependencies,
    pub model: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dependencies {
    pub gemini_api: String,
    pub expense_api: String,
    pub notes_api: String,
}

fn connectivity(probe: Option<bool>) -> String {
    match probe {
        Some(true) => "connected",
        Some(false) => "disconnected",
        None => "mock",
    }
    .to_string()
}

impl ServiceProbes {
    pub async fn report(&self) -> HealthReport {
        let gemini_ok = match &self.gemini {
            Some(client) => client.check_connection().await,
            None => false,
        };
        let expense = match &self.expense_api {
            Some(api) => Some(api.ping().await),
            None => None,
        };
        let notes = match &self.notes_api {
            Some(api) => Some(api.ping().await),
            None => None,
        };

        let healthy = gemini_ok && expense != Some(false) && notes != Some(false);

        HealthReport {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            dependencies: Dependencies {
                gemini_api: connectivity(Some(gemini_ok)),
                expense_api: connectivity(expense),
                notes_api: connectivity(notes),
            },
            model: self.gemini.as_ref().map(|c| c.model().to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub assistant: Arc<Assistant>,
    pub probes: ServiceProbes,
}

/// =============================
/// Status Endpoints
/// =============================

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "running",
        "message": "Finance assistant API is ready!"
    }))
}

async fn health(State(state): State<ApiState>) -> Json<HealthReport> {
    Json(state.probes.report().await)
}

/// =============================
/// Chat Endpoints
/// =============================

async fn chat(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> Response {
    if let Err(message) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, message);
    }

    info!(user_id = %req.user_id, "chat request");

    match state.assistant.run(req.into_turn()).await {
        Ok(outcome) => {
            if outcome.status == TurnStatus::Failed {
                warn!(session_id = %outcome.session_id, error = ?outcome.error, "turn failed");
            }
            Json(ChatResponse {
                session_id: outcome.session_id,
                message: outcome.reply,
                error: outcome.error,
            })
            .into_response()
        }
        Err(e @ AssistantError::InvalidArgument(_)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            error!("chat request failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("An internal error occurred: {}", e),
            )
        }
    }
}

async fn chat_stream(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> Response {
    if let Err(message) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, message);
    }

    info!(user_id = %req.user_id, "streaming chat request");

    let (tx, rx) = mpsc::channel(32);

    // Dropping the response body (client went away) cancels the turn.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let turn = req.into_turn().with_cancel(cancel);

    let assistant = state.assistant.clone();
    tokio::spawn(async move {
        if let Err(e) = assistant.run_streaming(turn, tx).await {
            warn!("streaming turn rejected: {}", e);
        }
    });

    let stream = ReceiverStream::new(rx).map(move |event| {
        let _ = &guard;
        Ok::<_, Infallible>(event.to_ndjson())
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// =============================
/// Router
/// =============================

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn create_router(state: ApiState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

pub async fn start_server(state: ApiState, cors_origins: &[String], port: u16) -> crate::Result<()> {
    let router = create_router(state, cors_origins);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("🌐 API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analyst;
    use crate::config::AgentConfig;
    use crate::execution::ToolExecutor;
    use crate::models::{AssistantTurn, ToolCall};
    use crate::reasoning::ScriptedReasoner;
    use crate::state::InMemorySessionStore;
    use crate::storage::InMemoryLedger;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct NoAnalyst;

    #[async_trait]
    impl Analyst for NoAnalyst {
        async fn analyze(&self, _data: &str) -> crate::Result<String> {
            Ok("nothing to report".to_string())
        }
    }

    fn app(turns: Vec<AssistantTurn>) -> Router {
        let ledger = InMemoryLedger::new();
        let executor = ToolExecutor::new(
            Arc::new(ToolRegistry::standard().unwrap()),
            Arc::new(ledger.clone()),
            Arc::new(ledger),
            Arc::new(NoAnalyst),
        );
        let assistant = Assistant::new(
            Arc::new(ScriptedReasoner::new(turns)),
            Arc::new(executor),
            Arc::new(InMemorySessionStore::new()),
            AgentConfig::default(),
        );

        create_router(
            ApiState {
                assistant: Arc::new(assistant),
                probes: ServiceProbes::default(),
            },
            &["http://localhost:3000".to_string()],
        )
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_root() {
        let response = app(vec![])
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "running");
    }

    #[tokio::test]
    async fn test_health_degraded_without_gemini() {
        let response = app(vec![])
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let report: HealthReport = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(report.status, "degraded");
        assert_eq!(report.dependencies.gemini_api, "disconnected");
        assert_eq!(report.dependencies.expense_api, "mock");
    }

    #[tokio::test]
    async fn test_chat_round_trip() {
        let response = app(vec![
            AssistantTurn::ToolRequest(vec![ToolCall::new(
                "create_expense",
                json!({"amount": 4.5, "description": "coffee"}),
            )]),
            AssistantTurn::FinalReply("Saved your $4.50 coffee.".into()),
        ])
        .oneshot(post_json(
            "/chat",
            json!({"user_id": "u1", "message": "I bought coffee for 4.50"}),
        ))
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: ChatResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body.session_id, "user-u1-thread");
        assert!(body.message.contains("4.50"));
        assert!(body.error.is_none());
    }

    #[tokio::test]
    async fn test_chat_requires_fields() {
        let response = app(vec![])
            .oneshot(post_json("/chat", json!({"user_id": "u1", "message": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: ApiResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(!body.success);
    }

    #[tokio::test]
    async fn test_chat_reports_reasoning_failure() {
        let response = app(vec![])
            .oneshot(post_json("/chat", json!({"user_id": "u1", "message": "hi", "session_id": "s9"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: ChatResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body.session_id, "s9");
        assert!(body.error.is_some());
    }

    #[tokio::test]
    async fn test_stream_emits_ndjson_events() {
        let response = app(vec![
            AssistantTurn::ToolRequest(vec![ToolCall::new("fetch_user_expenses", json!({}))]),
            AssistantTurn::FinalReply("You have no expenses yet.".into()),
        ])
        .oneshot(post_json(
            "/chat/stream",
            json!({"user_id": "u1", "message": "what did I spend?"}),
        ))
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/x-ndjson"
        );

        let text = body_text(response).await;
        let events: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["start", "tool_call", "tool_result", "token", "end"]);
        assert_eq!(
            events[2]["outputs"][0]["outcome"]["summary"],
            "No expenses found for this user."
        );
    }

    #[tokio::test]
    async fn test_stream_rejects_blank_user() {
        let response = app(vec![])
            .oneshot(post_json("/chat/stream", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
