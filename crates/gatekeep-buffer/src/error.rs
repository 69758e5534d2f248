// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("failed to encode buffer entry: {0}")]
    Encode(serde_json::Error),
    #[error("malformed activity member: {0:?}")]
    MalformedMember(String),
}
