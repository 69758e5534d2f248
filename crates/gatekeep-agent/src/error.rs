// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("agent request timed out")]
    Timeout,
    #[error("network error talking to agent: {0}")]
    Network(#[from] reqwest::Error),
    #[error("failed to decode agent response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl AgentError {
    /// True for conditions the processor's retry policy should retry:
    /// network failures, timeouts, and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Timeout | AgentError::Network(_) => true,
            AgentError::Http { status, .. } => *status >= 500,
            AgentError::Decode(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AgentError::Http { status, .. } if *status == 404)
    }
}
