// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use gatekeep_types::{HistoryEntry, HistoryKey, ReadOptions};

use crate::{trim_to_budget, HistoryError, HistoryStore};

#[derive(Default)]
pub struct InMemoryHistoryStore {
    entries: Mutex<HashMap<HistoryKey, Vec<HistoryEntry>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn read_history(
        &self,
        key: &HistoryKey,
        opts: ReadOptions,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let map = self.entries.lock().unwrap();
        let entries = map.get(key).cloned().unwrap_or_default();
        Ok(trim_to_budget(entries, opts))
    }

    async fn append_history(
        &self,
        key: &HistoryKey,
        entry: HistoryEntry,
    ) -> Result<(), HistoryError> {
        let mut map = self.entries.lock().unwrap();
        map.entry(key.clone()).or_default().push(entry);
        Ok(())
    }
}
