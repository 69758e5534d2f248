// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("failed to encode job payload: {0}")]
    Encode(serde_json::Error),
    #[error("delivery {0} carried an undecodable job payload: {1}")]
    Decode(String, serde_json::Error),
    #[error("delivery {0} is missing its {1:?} field")]
    MalformedDelivery(String, &'static str),
}
