//! Compact text summaries of tool output
//!
//! Raw collaborator payloads never go back to the reasoning service. Fetches
//! surface the most recent few records plus aggregates.

use crate::models::{ExpenseRecord, Note};

/// Number of records listed individually in a fetch summary
pub const RECENT_RECORDS: usize = 5;

pub const NO_EXPENSES: &str = "No expenses found for this user.";
pub const NO_NOTES: &str = "No notes found for this user.";

pub fn expense_created(record: &ExpenseRecord) -> String {
    format!(
        "Expense recorded: {:.2} for {} ({}) on {}{}.",
        record.amount,
        record.description,
        record.category.as_deref().unwrap_or("uncategorized"),
        record.date,
        record
            .id
            .as_deref()
            .map(|id| format!(" [id {}]", id))
            .unwrap_or_default(),
    )
}

pub fn note_created(note: &Note) -> String {
    format!(
        "Note saved{}: \"{}\"",
        note.id
            .as_deref()
            .map(|id| format!(" [id {}]", id))
            .unwrap_or_default(),
        note.text
    )
}

pub fn expenses(records: &[ExpenseRecord]) -> String {
    if records.is_empty() {
        return NO_EXPENSES.to_string();
    }

    let mut sorted: Vec<&ExpenseRecord> = records.iter().collect();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));

    let total: f64 = records.iter().map(|r| r.amount).sum();
    let shown = sorted.len().min(RECENT_RECORDS);

    let mut out = format!(
        "Found {} expense(s) totaling {:.2}. Most recent {}:\n",
        records.len(),
        total,
        shown
    );

    for record in sorted.iter().take(RECENT_RECORDS) {
        out.push_str(&format!(
            "- {} | {:.2} | {}",
            record.date, record.amount, record.description
        ));
        if let Some(category) = &record.category {
            out.push_str(&format!(" ({})", category));
        }
        out.push('\n');
    }

    out.trim_end().to_string()
}

pub fn notes(notes: &[Note]) -> String {
    if notes.is_empty() {
        return NO_NOTES.to_string();
    }

    let mut sorted: Vec<&Note> = notes.iter().collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let shown = sorted.len().min(RECENT_RECORDS);
    let mut out = format!("Found {} note(s). Most recent {}:\n", notes.len(), shown);

    for note in sorted.iter().take(RECENT_RECORDS) {
        out.push_str(&format!(
            "- {} | {}\n",
            note.created_at.format("%Y-%m-%d"),
            note.text
        ));
    }

    out.trim_end().to_string()
}
