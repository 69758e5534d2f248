// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Durable job intake: a small Redis-streams queue standing in
//! for the bullmq semantics the source system relies on. Consumer groups
//! give at-least-once delivery; `XPENDING`/`XCLAIM` give stalled-job
//! recovery. One stream, one consumer group per worker fleet — the core
//! stays on a single infrastructure dependency.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gatekeep_types::SessionJobData;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::QueueError;

/// A job handed to a worker, still owned by the queue until acked, retried,
/// or failed. `attempt` counts prior delivery attempts (0 on first try).
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub job: SessionJobData,
    pub attempt: u32,
}

#[async_trait]
pub trait DurableQueue: Send + Sync {
    async fn enqueue(&self, job: &SessionJobData) -> Result<(), QueueError>;

    /// Poll for the next undelivered job, blocking up to `block` before
    /// returning `Ok(None)`. Entries whose payload fails to decode are
    /// parked to the failed list and skipped rather than surfaced as an
    /// error — retrying a malformed payload can never succeed.
    async fn next(&self, block: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Requeue `delivery` with its attempt count incremented, after
    /// waiting `delay` (the caller has already computed the backoff).
    async fn retry(&self, delivery: Delivery, delay: Duration) -> Result<(), QueueError>;

    /// Give up on `delivery`: record it in the capped failed-jobs list and
    /// remove it from the pending set.
    async fn fail(&self, delivery: Delivery, reason: &str) -> Result<(), QueueError>;

    /// Claim entries that have sat pending longer than `min_idle` onto this
    /// consumer, returning them ready for dispatch.
    async fn reclaim_stalled(&self, min_idle: Duration) -> Result<Vec<Delivery>, QueueError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct FailedEntry {
    id: String,
    /// Raw JSON of the job payload, preserved even when it failed to
    /// decode into a [`SessionJobData`] so the entry stays inspectable.
    payload: String,
    attempt: u32,
    reason: String,
    failed_at: chrono::DateTime<Utc>,
}

const MAX_FAILED_ENTRIES: isize = 99; // LTRIM is inclusive; keeps the newest 100

pub struct RedisStreamQueue {
    conn: ConnectionManager,
    stream_key: String,
    failed_key: String,
    group: String,
    consumer: String,
}

impl RedisStreamQueue {
    pub fn new(conn: ConnectionManager, group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            conn,
            stream_key: "queue:session-jobs".to_string(),
            failed_key: "queue:session-jobs:failed".to_string(),
            group: group.into(),
            consumer: consumer.into(),
        }
    }

    /// Creates the consumer group if it doesn't already exist. Must be
    /// called once before the first `next()`.
    pub async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let result: Result<String, redis::RedisError> =
            conn.xgroup_create_mkstream(&self.stream_key, &self.group, "$").await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn encode_job(job: &SessionJobData) -> Result<String, QueueError> {
        serde_json::to_string(job).map_err(QueueError::Encode)
    }

    async fn ack_and_delete(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(&self.stream_key, &self.group, &[id]).await?;
        let _: i64 = conn.xdel(&self.stream_key, &[id]).await?;
        Ok(())
    }

    async fn park_failed(&self, id: &str, payload: String, attempt: u32, reason: String) -> Result<(), QueueError> {
        let entry = FailedEntry {
            id: id.to_string(),
            payload,
            attempt,
            reason,
            failed_at: Utc::now(),
        };
        let encoded = serde_json::to_string(&entry).map_err(QueueError::Encode)?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.lpush(&self.failed_key, encoded).await?;
        let _: () = conn.ltrim(&self.failed_key, 0, MAX_FAILED_ENTRIES).await?;
        self.ack_and_delete(id).await
    }

    fn raw_job_field(fields: &HashMap<String, redis::Value>) -> String {
        fields
            .get("job")
            .and_then(|v| redis::from_redis_value::<String>(v).ok())
            .unwrap_or_default()
    }

    fn decode_entry(id: &str, fields: &HashMap<String, redis::Value>) -> Result<(SessionJobData, u32), QueueError> {
        let raw_job = fields
            .get("job")
            .ok_or_else(|| QueueError::MalformedDelivery(id.to_string(), "job"))?;
        let raw_job: String = redis::from_redis_value(raw_job)?;
        let job: SessionJobData = serde_json::from_str(&raw_job)
            .map_err(|err| QueueError::Decode(id.to_string(), err))?;
        let attempt = fields
            .get("attempt")
            .and_then(|v| redis::from_redis_value::<String>(v).ok())
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0);
        Ok((job, attempt))
    }
}

#[async_trait]
impl DurableQueue for RedisStreamQueue {
    async fn enqueue(&self, job: &SessionJobData) -> Result<(), QueueError> {
        let payload = Self::encode_job(job)?;
        let mut conn = self.conn.clone();
        let _: String = conn
            .xadd(&self.stream_key, "*", &[("job", payload.as_str()), ("attempt", "0")])
            .await?;
        Ok(())
    }

    async fn next(&self, block: Duration) -> Result<Option<Delivery>, QueueError> {
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1)
            .block(block.as_millis() as usize);
        loop {
            let mut conn = self.conn.clone();
            let reply: StreamReadReply = conn
                .xread_options(&[&self.stream_key], &[">"], &opts)
                .await?;
            let Some(stream) = reply.keys.into_iter().next() else {
                return Ok(None);
            };
            let Some(entry) = stream.ids.into_iter().next() else {
                return Ok(None);
            };
            match Self::decode_entry(&entry.id, &entry.map) {
                Ok((job, attempt)) => {
                    return Ok(Some(Delivery {
                        id: entry.id,
                        job,
                        attempt,
                    }))
                }
                Err(err) => {
                    tracing::warn!(id = %entry.id, error = %err, "parking undecodable job delivery");
                    let raw = Self::raw_job_field(&entry.map);
                    self.park_failed(&entry.id, raw, 0, err.to_string()).await.ok();
                    // loop again: this entry is disposed of, try the next one
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.ack_and_delete(&delivery.id).await
    }

    async fn retry(&self, delivery: Delivery, delay: Duration) -> Result<(), QueueError> {
        tokio::time::sleep(delay).await;
        let payload = Self::encode_job(&delivery.job)?;
        let next_attempt = (delivery.attempt + 1).to_string();
        let mut conn = self.conn.clone();
        let _: String = conn
            .xadd(
                &self.stream_key,
                "*",
                &[("job", payload.as_str()), ("attempt", next_attempt.as_str())],
            )
            .await?;
        self.ack_and_delete(&delivery.id).await
    }

    async fn fail(&self, delivery: Delivery, reason: &str) -> Result<(), QueueError> {
        let payload = Self::encode_job(&delivery.job)?;
        self.park_failed(&delivery.id, payload, delivery.attempt, reason.to_string())
            .await
    }

    async fn reclaim_stalled(&self, min_idle: Duration) -> Result<Vec<Delivery>, QueueError> {
        let mut conn = self.conn.clone();
        let pending: redis::streams::StreamPendingCountReply = conn
            .xpending_count(
                &self.stream_key,
                &self.group,
                "-",
                "+",
                64,
            )
            .await?;

        let min_idle_ms = min_idle.as_millis() as usize;
        let stalled: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms >= min_idle_ms)
            .map(|p| p.id)
            .collect();
        if stalled.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: redis::streams::StreamClaimReply = conn
            .xclaim(
                &self.stream_key,
                &self.group,
                &self.consumer,
                min_idle.as_millis() as usize,
                &stalled,
            )
            .await?;

        let mut deliveries = Vec::with_capacity(claimed.ids.len());
        for entry in claimed.ids {
            match Self::decode_entry(&entry.id, &entry.map) {
                Ok((job, attempt)) => deliveries.push(Delivery {
                    id: entry.id,
                    job,
                    attempt: attempt + 1,
                }),
                Err(err) => {
                    tracing::warn!(id = %entry.id, error = %err, "parking undecodable reclaimed delivery");
                    let raw = Self::raw_job_field(&entry.map);
                    self.park_failed(&entry.id, raw, 0, err.to_string()).await.ok();
                }
            }
        }
        Ok(deliveries)
    }
}

/// In-process queue used by worker tests; no blocking poll, no stalled-job
/// simulation.
pub struct InMemoryQueue {
    ready: Mutex<VecDeque<Delivery>>,
    pub(crate) pending: Mutex<HashMap<String, Delivery>>,
    pub failed: Mutex<Vec<(Delivery, String)>>,
    next_id: AtomicU64,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            pending: Mutex::new(HashMap::new()),
            failed: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    async fn enqueue(&self, job: &SessionJobData) -> Result<(), QueueError> {
        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.ready.lock().await.push_back(Delivery {
            id,
            job: job.clone(),
            attempt: 0,
        });
        Ok(())
    }

    async fn next(&self, _block: Duration) -> Result<Option<Delivery>, QueueError> {
        let Some(delivery) = self.ready.lock().await.pop_front() else {
            return Ok(None);
        };
        self.pending
            .lock()
            .await
            .insert(delivery.id.clone(), delivery.clone());
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.pending.lock().await.remove(&delivery.id);
        Ok(())
    }

    async fn retry(&self, mut delivery: Delivery, delay: Duration) -> Result<(), QueueError> {
        tokio::time::sleep(delay).await;
        self.pending.lock().await.remove(&delivery.id);
        delivery.attempt += 1;
        self.ready.lock().await.push_back(delivery);
        Ok(())
    }

    async fn fail(&self, delivery: Delivery, reason: &str) -> Result<(), QueueError> {
        self.pending.lock().await.remove(&delivery.id);
        self.failed.lock().await.push((delivery, reason.to_string()));
        Ok(())
    }

    async fn reclaim_stalled(&self, _min_idle: Duration) -> Result<Vec<Delivery>, QueueError> {
        Ok(Vec::new())
    }
}
