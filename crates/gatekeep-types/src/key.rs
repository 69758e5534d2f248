// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use crate::ident::Identifier;

/// The tuple that identifies one conversation thread.
///
/// `group_id == "0"` denotes a direct-message channel (no group context).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub bot_id: Identifier,
    pub group_id: Identifier,
    pub session_id: Identifier,
}

impl ConversationKey {
    pub fn new(bot_id: Identifier, group_id: Identifier, session_id: Identifier) -> Self {
        Self {
            bot_id,
            group_id,
            session_id,
        }
    }

    pub fn is_direct_message(&self) -> bool {
        self.group_id.as_str() == "0"
    }

    /// Redis member / log-friendly encoding: `<botId>:<groupId>:<sessionId>`.
    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}",
            self.bot_id, self.group_id, self.session_id
        )
    }

    pub fn buffer_key(&self) -> String {
        format!("session:buffer:{}", self.encode())
    }

    pub fn gate_key(&self) -> String {
        format!("session:gate:{}", self.encode())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
