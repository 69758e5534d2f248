// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Assistant,
    System,
}

/// One append-only history record. Only ever appended by a processor that
/// currently holds the gate for the referenced session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default = "default_true")]
    pub include_in_context: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

fn default_true() -> bool {
    true
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role: HistoryRole::User,
            content: content.into(),
            created_at,
            group_id: None,
            session_id: None,
            include_in_context: true,
            trace: None,
        }
    }

    pub fn assistant(content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role: HistoryRole::Assistant,
            content: content.into(),
            created_at,
            group_id: None,
            session_id: None,
            include_in_context: true,
            trace: None,
        }
    }

    /// A stream-trace record: recorded for audit but excluded from the
    /// context sent back to the agent on subsequent turns.
    pub fn trace(content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role: HistoryRole::System,
            content: content.into(),
            created_at,
            group_id: None,
            session_id: None,
            include_in_context: false,
            trace: None,
        }
    }
}

/// Key under which a conversation's history is stored:
/// `(botAccountId = "${platform}:${selfId}", userId)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryKey {
    pub bot_account_id: String,
    pub user_id: String,
}

impl HistoryKey {
    pub fn new(bot_account_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            bot_account_id: bot_account_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Trim/read options for `readHistory`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub max_entries: Option<usize>,
    pub max_bytes: Option<usize>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
