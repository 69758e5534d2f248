// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ident::Identifier, key::ConversationKey};

/// Durable-queue payload. Carries the gate token the job must match against
/// the current gate holder before it is allowed to drive the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionJobData {
    pub bot_id: Identifier,
    pub group_id: Identifier,
    pub session_id: Identifier,
    pub user_id: Identifier,
    pub key: u64,
    pub gate_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl SessionJobData {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(
            self.bot_id.clone(),
            self.group_id.clone(),
            self.session_id.clone(),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
