// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Durable-queue consumer: pops session jobs off a Redis-streams
//! queue and hands each to a `gatekeep-core::SessionProcessor`, with
//! bounded concurrency, structured retry/backoff, and stalled-job
//! recovery via `XPENDING`/`XCLAIM`.

mod error;
mod queue;
mod worker;

pub use error::QueueError;
pub use queue::{Delivery, DurableQueue, InMemoryQueue, RedisStreamQueue};
pub use worker::{Worker, WorkerConfig};
