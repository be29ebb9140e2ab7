//! Postgres-backed session store
//!
//! One row per message. Tool calls are stored as JSON text so the table stays
//! readable from psql.

use super::SessionStore;
use crate::error::AssistantError;
use crate::models::{Message, Role, ToolCall};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

pub struct PgSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgSessionStore {
    /// Lazily connecting pool; the schema is created on first use
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| AssistantError::Config(format!("Invalid database URL: {}", e)))?;

        info!("Session store backend: postgres");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS session_messages (
                      id BIGSERIAL PRIMARY KEY,
                      session_id TEXT NOT NULL,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      tool_calls TEXT,
                      call_id TEXT,
                      tool_name TEXT,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_session_messages_session
                    ON session_messages (session_id, id);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AssistantError::Storage(format!("Failed to initialize session schema: {}", e))
            })?;

        Ok(())
    }
}

fn role_to_db(role: Role) -> &'static str {
    match role {
        Role::Human => "human",
        Role::Assistant => "assistant",
        Role::ToolResult => "tool_result",
    }
}

fn role_from_db(role: &str) -> Result<Role> {
    match role {
        "human" => Ok(Role::Human),
        "assistant" => Ok(Role::Assistant),
        "tool_result" => Ok(Role::ToolResult),
        other => Err(AssistantError::Session(format!(
            "unknown role '{}' in stored history",
            other
        ))),
    }
}

fn message_from_row(row: &PgRow) -> Result<Message> {
    let role: String = row.try_get("role")?;
    let tool_calls: Option<String> = row.try_get("tool_calls")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    let tool_calls: Vec<ToolCall> = match tool_calls.as_deref() {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
        _ => Vec::new(),
    };

    Ok(Message {
        role: role_from_db(&role)?,
        content: row.try_get("content")?,
        tool_calls,
        call_id: row.try_get("call_id")?,
        tool_name: row.try_get("tool_name")?,
        created_at,
    })
}

#[async_trait::async_trait]
impl SessionStore for PgSessionStore {
    async fn get(&self, session_id: &str) -> Result<Vec<Message>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT role, content, tool_calls, call_id, tool_name, created_at
            FROM session_messages
            WHERE session_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AssistantError::Storage(format!("Failed to load session history: {}", e)))?;

        rows.iter().map(message_from_row).collect()
    }

    async fn append(&self, session_id: &str, message: Message) -> Result<()> {
        self.append_all(session_id, vec![message]).await
    }

    async fn append_all(&self, session_id: &str, messages: Vec<Message>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            AssistantError::Storage(format!("Failed to begin session transaction: {}", e))
        })?;

        for message in &messages {
            let tool_calls = if message.tool_calls.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&message.tool_calls)?)
            };

            sqlx::query(
                r#"
                INSERT INTO session_messages
                  (session_id, role, content, tool_calls, call_id, tool_name, created_at)
                VALUES
                  ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(session_id)
            .bind(role_to_db(message.role))
            .bind(&message.content)
            .bind(tool_calls)
            .bind(&message.call_id)
            .bind(&message.tool_name)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AssistantError::Storage(format!("Failed to insert session message: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            AssistantError::Storage(format!("Failed to commit session messages: {}", e))
        })?;

        Ok(())
    }
}
