// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only turn history, keyed by `(botAccountId, userId)`.
//! Entries referencing a session are only ever appended by the processor
//! currently holding that session's gate — this crate doesn't enforce
//! that invariant itself, it just stores what it's given.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use gatekeep_types::{HistoryEntry, HistoryKey, ReadOptions};

pub use error::HistoryError;
pub use memory::InMemoryHistoryStore;
pub use postgres::PostgresHistoryStore;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Oldest-first. When `max_entries`/`max_bytes` are set, the result is
    /// trimmed from the head (the oldest entries are dropped first) to
    /// satisfy the budget, never from the tail.
    async fn read_history(
        &self,
        key: &HistoryKey,
        opts: ReadOptions,
    ) -> Result<Vec<HistoryEntry>, HistoryError>;

    async fn append_history(
        &self,
        key: &HistoryKey,
        entry: HistoryEntry,
    ) -> Result<(), HistoryError>;
}

/// Shared head-trim logic: used by both the in-memory and Postgres
/// implementations so the budget semantics only live in one place.
fn trim_to_budget(mut entries: Vec<HistoryEntry>, opts: ReadOptions) -> Vec<HistoryEntry> {
    if let Some(max_entries) = opts.max_entries {
        if entries.len() > max_entries {
            let drop = entries.len() - max_entries;
            entries.drain(0..drop);
        }
    }
    if let Some(max_bytes) = opts.max_bytes {
        let mut total: usize = entries.iter().map(|e| e.content.len()).sum();
        while total > max_bytes && !entries.is_empty() {
            let removed = entries.remove(0);
            total -= removed.content.len();
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(content: &str) -> HistoryEntry {
        HistoryEntry::user(content, Utc::now())
    }

    #[test]
    fn trim_by_max_entries_drops_from_the_head() {
        let entries = vec![entry("a"), entry("b"), entry("c")];
        let trimmed = trim_to_budget(
            entries,
            ReadOptions {
                max_entries: Some(2),
                max_bytes: None,
            },
        );
        assert_eq!(
            trimmed.iter().map(|e| e.content.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }

    #[test]
    fn trim_by_max_bytes_drops_oldest_until_under_budget() {
        let entries = vec![entry("aaaa"), entry("bb"), entry("c")];
        let trimmed = trim_to_budget(
            entries,
            ReadOptions {
                max_entries: None,
                max_bytes: Some(3),
            },
        );
        assert_eq!(
            trimmed.iter().map(|e| e.content.as_str()).collect::<Vec<_>>(),
            vec!["bb", "c"]
        );
    }

    #[test]
    fn no_budget_leaves_entries_untouched() {
        let entries = vec![entry("a"), entry("b")];
        let trimmed = trim_to_budget(entries.clone(), ReadOptions::default());
        assert_eq!(trimmed, entries);
    }
}
