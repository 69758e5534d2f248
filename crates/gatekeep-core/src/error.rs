// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("buffer store error: {0}")]
    Buffer(#[from] gatekeep_buffer::BufferError),
    #[error("session repository error: {0}")]
    Session(#[from] gatekeep_session::SessionRepositoryError),
    #[error("history store error: {0}")]
    History(#[from] gatekeep_history::HistoryError),
    #[error("agent error: {0}")]
    Agent(#[from] gatekeep_agent::AgentError),
    #[error("adapter error: {0}")]
    Adapter(anyhow::Error),
    #[error("prompt of {bytes} bytes exceeds the {limit} byte budget")]
    PromptTooBig { bytes: usize, limit: usize },
}
