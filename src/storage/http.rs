//! HTTP-backed expense and notes collaborators
//!
//! Both services speak JSON. The expense API may require a bearer key; the
//! notes API is unauthenticated. Every call carries the client timeout.

use super::{ExpenseStore, NoteStore};
use crate::error::AssistantError;
use crate::models::{ExpenseRecord, NewExpense, Note};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct JsonApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl JsonApiClient {
    fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .map_err(|e| AssistantError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let request = self
            .client
            .post(self.url(path))
            .header("Content-Type", "application/json")
            .json(body);
        self.send(path, self.authorize(request)).await
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let request = self.client.get(self.url(path)).query(query);
        self.send(path, self.authorize(request)).await
    }

    async fn send(&self, path: &str, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await.map_err(|e| {
            AssistantError::Storage(format!("request to {} failed: {}", path, e))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            AssistantError::Storage(format!("reading response from {} failed: {}", path, e))
        })?;

        if !status.is_success() {
            return Err(AssistantError::Storage(format!(
                "{} returned {}: {}",
                path,
                status,
                truncate(&text, 200)
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            AssistantError::Storage(format!("invalid JSON from {}: {}", path, e))
        })
    }

    async fn ping(&self) -> bool {
        let request = self.client.get(self.url("/health")).timeout(HEALTH_TIMEOUT);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(base_url = %self.base_url, error = %e, "health probe failed");
                false
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Expense API client (`/expenses`, `/fetchExpenses`)
#[derive(Clone)]
pub struct HttpExpenseStore {
    api: JsonApiClient,
}

impl HttpExpenseStore {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api: JsonApiClient::new(base_url, api_key, timeout)?,
        })
    }

    pub async fn ping(&self) -> bool {
        self.api.ping().await
    }
}

#[async_trait]
impl ExpenseStore for HttpExpenseStore {
    async fn create(&self, expense: NewExpense) -> Result<ExpenseRecord> {
        let date = expense.date.unwrap_or_else(|| Utc::now().date_naive());
        let payload = json!({
            "user_id": expense.user_id,
            "amount": expense.amount,
            "description": expense.description,
            "category": expense.category,
            "date": date.format("%Y-%m-%d").to_string(),
        });

        debug!(user_id = %expense.user_id, amount = expense.amount, "creating expense");
        let response = self.api.post_json("/expenses", &payload).await?;

        let body = response.get("expense").cloned().unwrap_or(response);
        Ok(RawExpense::parse(&body)
            .and_then(|raw| raw.into_record())
            .unwrap_or_else(|| ExpenseRecord {
                id: body.get("id").map(id_string),
                user_id: expense.user_id,
                amount: expense.amount,
                description: expense.description,
                category: Some(expense.category),
                date,
                created_at: Some(Utc::now()),
            }))
    }

    async fn list(&self, user_id: &str, limit: u32) -> Result<Vec<ExpenseRecord>> {
        let response = self
            .api
            .post_json("/fetchExpenses", &json!({ "userId": user_id, "limit": limit }))
            .await?;

        let items = match &response {
            Value::Array(items) => items.clone(),
            other => other
                .get("expenses")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| {
                    AssistantError::Storage("fetchExpenses response has no 'expenses' array".into())
                })?,
        };

        let mut records: Vec<ExpenseRecord> = items
            .iter()
            .filter_map(|item| {
                let record = RawExpense::parse(item).and_then(|raw| raw.into_record());
                if record.is_none() {
                    warn!(%item, "skipping malformed expense record");
                }
                record
            })
            .collect();

        records.sort_by(|a, b| b.date.cmp(&a.date));
        records.truncate(limit as usize);
        debug!(user_id, count = records.len(), "fetched expenses");
        Ok(records)
    }
}

/// Notes API client (`/notes`)
#[derive(Clone)]
pub struct HttpNoteStore {
    api: JsonApiClient,
}

impl HttpNoteStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api: JsonApiClient::new(base_url, None, timeout)?,
        })
    }

    pub async fn ping(&self) -> bool {
        self.api.ping().await
    }
}

#[async_trait]
impl NoteStore for HttpNoteStore {
    async fn create(&self, user_id: &str, text: &str) -> Result<Note> {
        debug!(user_id, "creating note");
        let response = self
            .api
            .post_json("/notes", &json!({ "user_id": user_id, "text": text }))
            .await?;

        Ok(RawNote::parse(&response)
            .map(RawNote::into_note)
            .unwrap_or_else(|| Note {
                id: response.get("id").map(id_string),
                user_id: user_id.to_string(),
                text: text.to_string(),
                created_at: Utc::now(),
            }))
    }

    async fn list(&self, user_id: &str, limit: u32) -> Result<Vec<Note>> {
        let response = self
            .api
            .get_json(
                "/notes",
                &[("user_id", user_id.to_string()), ("limit", limit.to_string())],
            )
            .await?;

        let items = match &response {
            Value::Array(items) => items.clone(),
            other => other
                .get("notes")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| AssistantError::Storage("notes response is not a list".into()))?,
        };

        let mut notes: Vec<Note> = items
            .iter()
            .filter_map(RawNote::parse)
            .map(RawNote::into_note)
            .collect();

        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notes.truncate(limit as usize);
        Ok(notes)
    }
}

//
// ================= Wire Shapes =================
//
// The upstream services are loose about field names and date formats:
// `date` vs `expense_date`, plain dates vs ISO timestamps, numeric ids,
// and categories either inline or joined as `{ "name": ... }`.

#[derive(Debug, Deserialize)]
struct RawExpense {
    #[serde(default)]
    id: Option<Value>,
    #[serde(alias = "userId")]
    user_id: String,
    amount: Value,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<Value>,
    #[serde(default)]
    categories: Option<Value>,
    #[serde(default, alias = "expense_date")]
    date: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

impl RawExpense {
    fn parse(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    fn into_record(self) -> Option<ExpenseRecord> {
        let amount = match &self.amount {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };

        let created_at = self.created_at.as_deref().and_then(parse_timestamp);
        let date = self
            .date
            .as_deref()
            .and_then(parse_date)
            .or_else(|| created_at.map(|t| t.date_naive()))?;

        let category = self
            .category
            .as_ref()
            .or(self.categories.as_ref())
            .and_then(category_name);

        Some(ExpenseRecord {
            id: self.id.as_ref().map(id_string),
            user_id: self.user_id,
            amount,
            description: self.description.unwrap_or_default(),
            category,
            date,
            created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawNote {
    #[serde(default)]
    id: Option<Value>,
    #[serde(alias = "userId")]
    user_id: String,
    text: String,
    #[serde(default)]
    created_at: Option<String>,
}

impl RawNote {
    fn parse(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    fn into_note(self) -> Note {
        Note {
            id: self.id.as_ref().map(id_string),
            user_id: self.user_id,
            text: self.text,
            created_at: self
                .created_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
        }
    }
}

fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn category_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(raw).map(|t| t.date_naive()))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}
