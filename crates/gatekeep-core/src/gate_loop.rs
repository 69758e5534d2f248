// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Drain-and-run loop holding the gate, with a heartbeat running
//! alongside it. Modelled the way this workspace's control
//! service runs a command loop next to a background task: one
//! `tokio::spawn` for the heartbeat, cancelled on every exit path by a
//! guard that aborts it on drop rather than by threading a `finally`
//! through the loop body.

use std::sync::Arc;
use std::time::Duration;

use gatekeep_buffer::BufferStore;
use gatekeep_types::{ConversationKey, SessionEvent};
use tokio::task::JoinHandle;

/// What `onBatch` decided after processing one drained batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnBatchOutcome {
    Continue,
    LostGate,
}

/// How the gate loop as a whole ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateLoopOutcome {
    /// The buffer was empty and the gate was released (or was already gone).
    Drained,
    /// Another holder has claimed the gate out from under us.
    LostGate,
}

/// Aborts the wrapped heartbeat task when dropped, so every exit path of
/// the gate loop — including an early `return` — stops the timer.
struct HeartbeatGuard(JoinHandle<()>);

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs the claim → drain → onBatch → try-release loop. The caller has
/// already acquired the gate with `token` before calling this.
pub async fn run_gate_loop<F, Fut>(
    buffer: Arc<dyn BufferStore>,
    key: ConversationKey,
    token: String,
    gate_ttl: Duration,
    heartbeat_interval: Duration,
    mut on_batch: F,
) -> GateLoopOutcome
where
    F: FnMut(Vec<SessionEvent>) -> Fut,
    Fut: std::future::Future<Output = OnBatchOutcome>,
{
    let _heartbeat = HeartbeatGuard(spawn_heartbeat(
        buffer.clone(),
        key.clone(),
        token.clone(),
        gate_ttl,
        heartbeat_interval,
    ));

    loop {
        match buffer.claim_gate(&key, &token, gate_ttl).await {
            Ok(true) => {}
            Ok(false) => return GateLoopOutcome::LostGate,
            Err(err) => {
                tracing::error!(error = %err, "claim_gate failed; treating as lost gate");
                return GateLoopOutcome::LostGate;
            }
        }

        let batch = match buffer.drain(&key).await {
            Ok(batch) => batch,
            Err(err) => {
                tracing::error!(error = %err, "drain failed; treating as lost gate");
                return GateLoopOutcome::LostGate;
            }
        };

        if batch.is_empty() {
            match buffer.try_release_gate(&key, &token).await {
                Ok(true) => return GateLoopOutcome::Drained,
                Ok(false) => continue,
                Err(err) => {
                    tracing::error!(error = %err, "try_release_gate failed; treating as lost gate");
                    return GateLoopOutcome::LostGate;
                }
            }
        }

        match on_batch(batch).await {
            OnBatchOutcome::Continue => continue,
            OnBatchOutcome::LostGate => return GateLoopOutcome::LostGate,
        }
    }
}

fn spawn_heartbeat(
    buffer: Arc<dyn BufferStore>,
    key: ConversationKey,
    token: String,
    gate_ttl: Duration,
    heartbeat_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match buffer.refresh_gate(&key, &token, gate_ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!("heartbeat refresh found the gate no longer ours; stopping");
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "heartbeat refresh_gate errored; stopping");
                    return;
                }
            }
        }
    })
}
