// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bounded-concurrency dispatch loop: pops deliveries off a
//! [`DurableQueue`] and hands each to a [`SessionProcessor`], the same way
//! this workspace's other long-running services pair a sequential
//! consumer loop with a `tokio::sync::Semaphore` for in-flight limits
//! instead of a fixed worker-thread pool.

use std::sync::Arc;
use std::time::Duration;

use gatekeep_core::SessionProcessor;
use tokio::sync::{watch, Semaphore};

use crate::queue::{Delivery, DurableQueue};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub stalled_interval: Duration,
    pub max_stalled: u32,
    pub poll_block: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            stalled_interval: Duration::from_secs(30),
            max_stalled: 1,
            poll_block: Duration::from_secs(5),
        }
    }
}

pub struct Worker<Q: DurableQueue + 'static> {
    queue: Arc<Q>,
    processor: Arc<SessionProcessor>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
}

impl<Q: DurableQueue + 'static> Worker<Q> {
    pub fn new(queue: Arc<Q>, processor: Arc<SessionProcessor>, config: WorkerConfig) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Arc::new(Self {
            queue,
            processor,
            config,
            semaphore,
        })
    }

    /// Runs the intake loop and the stalled-job reclaimer side by side
    /// until `shutdown` reports `true`. Returns once both have wound down.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let reclaimer = {
            let this = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { this.reclaim_loop(shutdown).await })
        };

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                delivery = self.queue.next(self.config.poll_block) => {
                    match delivery {
                        Ok(Some(delivery)) => self.clone().dispatch(delivery),
                        Ok(None) => {}
                        Err(err) => tracing::error!(error = %err, "queue poll failed"),
                    }
                }
            }
        }

        reclaimer.abort();
    }

    fn dispatch(self: Arc<Self>, delivery: Delivery) {
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("worker semaphore is never closed");
            self.handle_delivery(delivery).await;
        });
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        metrics::counter!("gatekeep_jobs_dispatched_total").increment(1);
        let attempt = delivery.attempt;
        let job = delivery.job.clone();

        match self.processor.clone().process(job).await {
            Ok(()) => {
                metrics::counter!("gatekeep_jobs_completed_total").increment(1);
                if let Err(err) = self.queue.ack(&delivery).await {
                    tracing::error!(error = %err, "ack failed after successful processing");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, attempt, "job processing failed");
                if attempt + 1 >= self.config.max_attempts {
                    metrics::counter!("gatekeep_jobs_failed_total").increment(1);
                    if let Err(park_err) = self.queue.fail(delivery, &err.to_string()).await {
                        tracing::error!(error = %park_err, "failed to park exhausted job");
                    }
                } else {
                    metrics::counter!("gatekeep_jobs_retried_total").increment(1);
                    let delay = self.config.base_backoff * 2u32.pow(attempt);
                    if let Err(retry_err) = self.queue.retry(delivery, delay).await {
                        tracing::error!(error = %retry_err, "failed to requeue job for retry");
                    }
                }
            }
        }
    }

    async fn reclaim_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.stalled_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    match self.queue.reclaim_stalled(self.config.stalled_interval).await {
                        Ok(reclaimed) => {
                            for delivery in reclaimed {
                                if delivery.attempt >= self.config.max_stalled {
                                    metrics::counter!("gatekeep_jobs_failed_total").increment(1);
                                    let _ = self
                                        .queue
                                        .fail(delivery, "exceeded max stalled redeliveries")
                                        .await;
                                } else {
                                    metrics::counter!("gatekeep_jobs_reclaimed_total").increment(1);
                                    self.clone().dispatch(delivery);
                                }
                            }
                        }
                        Err(err) => tracing::error!(error = %err, "stalled-job reclaim failed"),
                    }
                }
            }
        }
    }
}
