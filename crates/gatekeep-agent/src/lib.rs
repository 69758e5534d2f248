// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! HTTP client for the remote code-agent service: session
//! lifecycle calls plus the synchronous prompt call that runs one turn.

mod client;
mod error;
pub mod mock;
mod types;

pub use client::{AgentClient, HttpAgentClient};
pub use error::AgentError;
pub use mock::ScriptedAgentClient;
pub use types::{
    is_recognizable_session_id, AgentMessage, AgentMessageTime, CreateSessionRequest, ModelRef,
    PromptPart, PromptRequest, PromptResponse, SessionInfo,
};
