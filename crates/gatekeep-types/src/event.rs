// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of one inbound platform message, immutable after ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub platform: String,
    pub self_id: String,
    pub user_id: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub elements: Vec<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub extras: serde_json::Value,
}

impl SessionEvent {
    /// `historyKey`'s bot-account component: `${platform}:${selfId}`.
    pub fn bot_account_id(&self) -> String {
        format!("{}:{}", self.platform, self.self_id)
    }

    pub fn trimmed_content(&self) -> &str {
        self.content.trim()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
