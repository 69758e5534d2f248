// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ident::Identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
}

/// Metadata for one conversation. One-to-one with a `ConversationKey`;
/// created lazily on first job and mutated only by the processor that
/// currently holds the gate for this key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: Identifier,
    pub group_id: Identifier,
    pub bot_id: Identifier,
    pub owner_id: Identifier,
    pub key: u64,
    pub status: SessionStatus,
    /// Session id as known to the remote agent, once created.
    pub agent_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionMeta {
    pub fn new(
        session_id: Identifier,
        group_id: Identifier,
        bot_id: Identifier,
        owner_id: Identifier,
        key: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            group_id,
            bot_id,
            owner_id,
            key,
            status: SessionStatus::Idle,
            agent_session_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = SessionStatus::Running;
        self.updated_at = now;
    }

    pub fn mark_idle(&mut self, now: DateTime<Utc>) {
        self.status = SessionStatus::Idle;
        self.updated_at = now;
    }

    pub fn set_agent_session_id(&mut self, id: String, now: DateTime<Utc>) {
        self.agent_session_id = Some(id);
        self.updated_at = now;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
