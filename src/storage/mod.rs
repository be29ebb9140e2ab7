//! Expense and note collaborators
//!
//! The assistant never owns financial data. It issues create/list calls
//! through these traits; implementations live over HTTP (`http`) or in memory.

pub mod http;

pub use http::{HttpExpenseStore, HttpNoteStore};

use crate::models::{ExpenseRecord, NewExpense, Note};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Financial record storage
#[async_trait]
pub trait ExpenseStore: Send + Sync {
    async fn create(&self, expense: NewExpense) -> Result<ExpenseRecord>;

    /// Most recent first, by expense date
    async fn list(&self, user_id: &str, limit: u32) -> Result<Vec<ExpenseRecord>>;
}

#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn create(&self, user_id: &str, text: &str) -> Result<Note>;

    /// Most recent first
    async fn list(&self, user_id: &str, limit: u32) -> Result<Vec<Note>>;
}

#[derive(Default)]
struct Ledger {
    expenses: HashMap<String, Vec<ExpenseRecord>>,
    notes: HashMap<String, Vec<Note>>,
    categories: HashMap<String, Vec<String>>,
}

/// In-memory expense + note store for development, tests and offline fallback
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    inner: Arc<RwLock<Ledger>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records held across all users
    pub async fn record_count(&self) -> usize {
        let ledger = self.inner.read().await;
        ledger.expenses.values().map(Vec::len).sum::<usize>()
            + ledger.notes.values().map(Vec::len).sum::<usize>()
    }

    pub async fn categories(&self, user_id: &str) -> Vec<String> {
        let ledger = self.inner.read().await;
        ledger.categories.get(user_id).cloned().unwrap_or_default()
    }
}

/// Look up a user's category case-insensitively, creating it if absent
fn category_for(ledger: &mut Ledger, user_id: &str, name: &str) -> String {
    let known = ledger.categories.entry(user_id.to_string()).or_default();

    if let Some(existing) = known.iter().find(|c| c.eq_ignore_ascii_case(name.trim())) {
        return existing.clone();
    }

    let normalized = title_case(name);
    known.push(normalized.clone());
    normalized
}

fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[async_trait]
impl ExpenseStore for InMemoryLedger {
    async fn create(&self, expense: NewExpense) -> Result<ExpenseRecord> {
        let mut ledger = self.inner.write().await;
        let category = category_for(&mut ledger, &expense.user_id, &expense.category);

        let record = ExpenseRecord {
            id: Some(format!("exp_{}", Uuid::new_v4().simple())),
            user_id: expense.user_id.clone(),
            amount: expense.amount,
            description: expense.description,
            category: Some(category),
            date: expense.date.unwrap_or_else(|| Utc::now().date_naive()),
            created_at: Some(Utc::now()),
        };

        ledger
            .expenses
            .entry(expense.user_id)
            .or_default()
            .push(record.clone());

        Ok(record)
    }

    async fn list(&self, user_id: &str, limit: u32) -> Result<Vec<ExpenseRecord>> {
        let ledger = self.inner.read().await;
        let mut records = ledger.expenses.get(user_id).cloned().unwrap_or_default();

        // Newest date first; later inserts win ties.
        records.reverse();
        records.sort_by(|a, b| b.date.cmp(&a.date));
        records.truncate(limit as usize);

        Ok(records)
    }
}

#[async_trait]
impl NoteStore for InMemoryLedger {
    async fn create(&self, user_id: &str, text: &str) -> Result<Note> {
        let note = Note {
            id: Some(format!("note_{}", Uuid::new_v4().simple())),
            user_id: user_id.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        };

        let mut ledger = self.inner.write().await;
        ledger
            .notes
            .entry(user_id.to_string())
            .or_default()
            .push(note.clone());

        Ok(note)
    }

    async fn list(&self, user_id: &str, limit: u32) -> Result<Vec<Note>> {
        let ledger = self.inner.read().await;
        Ok(ledger
            .notes
            .get(user_id)
            .map(|notes| notes.iter().rev().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn new_expense(user: &str, amount: f64, category: &str, day: u32) -> NewExpense {
        NewExpense {
            user_id: user.to_string(),
            amount,
            description: "coffee".to_string(),
            category: category.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 9, day),
        }
    }

    #[tokio::test]
    async fn test_create_then_list_round_trip() {
        let ledger = InMemoryLedger::new();
        let created = ExpenseStore::create(&ledger, new_expense("u1", 12.5, "food", 20))
            .await
            .unwrap();

        let listed = ExpenseStore::list(&ledger, "u1", 20).await.unwrap();
        assert_eq!(listed, vec![created]);
        assert!(ExpenseStore::list(&ledger, "u2", 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_orders_by_date_and_limits() {
        let ledger = InMemoryLedger::new();
        for day in [3, 9, 1, 7] {
            ExpenseStore::create(&ledger, new_expense("u1", day as f64, "food", day))
                .await
                .unwrap();
        }

        let listed = ExpenseStore::list(&ledger, "u1", 2).await.unwrap();
        let days: Vec<u32> = listed.iter().map(|r| r.amount as u32).collect();
        assert_eq!(days, vec![9, 7]);
    }

    #[tokio::test]
    async fn test_categories_reused_case_insensitively() {
        let ledger = InMemoryLedger::new();
        ExpenseStore::create(&ledger, new_expense("u1", 5.0, "eating out", 1)).await.unwrap();
        let second = ExpenseStore::create(&ledger, new_expense("u1", 6.0, "EATING OUT", 2))
            .await
            .unwrap();

        assert_eq!(second.category.as_deref(), Some("Eating Out"));
        assert_eq!(ledger.categories("u1").await, vec!["Eating Out".to_string()]);
    }

    #[tokio::test]
    async fn test_notes_newest_first() {
        let ledger = InMemoryLedger::new();
        NoteStore::create(&ledger, "u1", "first").await.unwrap();
        NoteStore::create(&ledger, "u1", "second").await.unwrap();

        let notes = NoteStore::list(&ledger, "u1", 1).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text, "second");
        assert_eq!(ledger.record_count().await, 2);
    }
}
