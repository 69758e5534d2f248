// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `ses_` + hex/alphanumerics. Used both to validate ids coming
/// back from the agent and to recognize a stored id as still well-formed
/// before trusting it across a restart.
pub fn is_recognizable_session_id(id: &str) -> bool {
    match id.strip_prefix("ses_") {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()),
        None => false,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    pub directory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptPart {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptRequest {
    pub directory: String,
    pub session_id: String,
    pub system: String,
    pub model: ModelRef,
    pub tools: Vec<String>,
    pub parts: Vec<PromptPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptResponse {
    pub info: SessionInfo,
    pub parts: Vec<PromptPart>,
}

impl PromptResponse {
    /// Concatenation of all `text`-typed parts, trimmed. Empty means "no
    /// output" — the apology path.
    pub fn assistant_text(&self) -> String {
        let joined: String = self
            .parts
            .iter()
            .filter_map(|p| match p {
                PromptPart::Text { text } => Some(text.as_str()),
            })
            .collect::<Vec<_>>()
            .join("");
        joined.trim().to_string()
    }
}

/// One message as returned by `listMessages`, used only for timeout
/// recovery.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentMessage {
    pub role: String,
    pub time: AgentMessageTime,
    #[serde(default)]
    pub parts: Vec<PromptPart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentMessageTime {
    pub created: DateTime<Utc>,
}

impl AgentMessage {
    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                PromptPart::Text { text } => Some(text.as_str()),
            })
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_well_formed_session_ids() {
        assert!(is_recognizable_session_id("ses_abc123"));
        assert!(!is_recognizable_session_id("abc123"));
        assert!(!is_recognizable_session_id("ses_"));
        assert!(!is_recognizable_session_id("ses_has-dash"));
    }

    #[test]
    fn assistant_text_joins_and_trims_text_parts() {
        let resp = PromptResponse {
            info: SessionInfo { id: "ses_abc".into() },
            parts: vec![
                PromptPart::Text { text: " hello ".into() },
                PromptPart::Text { text: "world".into() },
            ],
        };
        assert_eq!(resp.assistant_text(), "hello world");
    }

    #[test]
    fn empty_parts_yield_empty_assistant_text() {
        let resp = PromptResponse {
            info: SessionInfo { id: "ses_abc".into() },
            parts: vec![],
        };
        assert_eq!(resp.assistant_text(), "");
    }
}
