// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Property tests for mutual exclusion, crash recovery, identifier
//! safety, and gate hygiene, against in-memory fakes. Recovery
//! freshness is covered by unit tests in `gatekeep-core::processor`;
//! drain ordering lives in `gatekeep-buffer`'s own test suite.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gatekeep_buffer::{BufferStore, InMemoryBufferStore};
use gatekeep_core::{run_gate_loop, GateLoopOutcome, OnBatchOutcome};
use gatekeep_types::{ConversationKey, Identifier, SessionEvent};
use proptest::prelude::*;

fn the_key() -> ConversationKey {
    let id = Identifier::parse("b1").unwrap();
    ConversationKey::new(id.clone(), Identifier::parse("g1").unwrap(), id)
}

fn event(content: String) -> SessionEvent {
    SessionEvent {
        platform: "discord".into(),
        self_id: "bot1".into(),
        user_id: "u1".into(),
        channel_id: "c1".into(),
        guild_id: None,
        message_id: None,
        content,
        elements: Vec::new(),
        timestamp: Utc::now(),
        extras: serde_json::Value::Null,
    }
}

proptest! {
    /// Of two tokens racing to claim the same key, exactly one wins,
    /// and appends that lost the race are still sitting in the buffer
    /// for whoever holds the gate.
    #[test]
    fn mutual_exclusion_only_one_claimant_ever_holds_the_gate(
        words in proptest::collection::vec("[a-z]{1,6}", 1..10),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryBufferStore::new();
            let key = the_key();
            let ttl = Duration::from_secs(60);

            let mut winners = 0;
            for (i, w) in words.iter().enumerate() {
                let token = format!("T{i}");
                let granted = store
                    .append_and_request_job(&key, &event(w.clone()), &token, ttl)
                    .await
                    .unwrap();
                if granted.is_some() {
                    winners += 1;
                }
            }
            prop_assert_eq!(winners, 1);

            // Every message is still there for the holder to drain.
            let drained = store.drain(&key).await.unwrap();
            prop_assert_eq!(drained.len(), words.len());
            Ok(())
        })?;
    }

    /// No message is ever lost across a simulated crash-and-reconnect
    /// of the gate holder — everything appended before a crash is either
    /// already drained (and would have been handed to onBatch) or still
    /// sitting in the buffer for the next holder.
    #[test]
    fn no_loss_across_a_simulated_holder_crash(
        before_crash in proptest::collection::vec("[a-z]{1,6}", 0..8),
        after_crash in proptest::collection::vec("[a-z]{1,6}", 0..8),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store: Arc<dyn BufferStore> = Arc::new(InMemoryBufferStore::new());
            let key = the_key();
            let ttl = Duration::from_secs(60);

            store.claim_gate(&key, "T1", ttl).await.unwrap();
            for w in &before_crash {
                store.append(&key, &event(w.clone())).await.unwrap();
            }

            // Holder "crashes": it never drained, never released. A
            // fresh worker restarts the loop with the same token after
            // recovering ownership (e.g. via a stalled-job requeue).
            for w in &after_crash {
                store.append(&key, &event(w.clone())).await.unwrap();
            }

            let drained = store.drain(&key).await.unwrap();
            let mut expected = before_crash.clone();
            expected.extend(after_crash.clone());
            let got: Vec<String> = drained.iter().map(|e| e.content.clone()).collect();
            prop_assert_eq!(got, expected);
            Ok(())
        })?;
    }

    /// Any identifier containing a path separator, `..`, a leading
    /// `.`, or a character outside the safe alphabet is rejected before
    /// it can reach a Redis key or filesystem path.
    #[test]
    fn identifier_safety_rejects_unsafe_segments(
        prefix in "[A-Za-z0-9_-]{0,6}",
        bad_char in prop_oneof![Just('/'), Just('\\'), Just(' '), Just(':'), Just('\n')],
        suffix in "[A-Za-z0-9_-]{0,6}",
    ) {
        let candidate = format!("{prefix}{bad_char}{suffix}");
        prop_assert!(Identifier::parse(candidate).is_err());
    }

    #[test]
    fn identifier_safety_rejects_dot_dot_anywhere(
        prefix in "[A-Za-z0-9_-]{0,6}",
        suffix in "[A-Za-z0-9_-]{0,6}",
    ) {
        let candidate = format!("{prefix}..{suffix}");
        prop_assert!(Identifier::parse(candidate).is_err());
    }

    /// Once the gate loop reports `Drained`, the gate is absent iff
    /// the buffer was empty at that instant — and since `Drained` only
    /// happens when `tryReleaseGate` succeeded on an empty buffer, a
    /// fresh token must be able to claim it immediately afterward.
    #[test]
    fn gate_hygiene_drained_implies_gate_is_free(
        words in proptest::collection::vec("[a-z]{1,6}", 0..6),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store: Arc<dyn BufferStore> = Arc::new(InMemoryBufferStore::new());
            let key = the_key();
            let ttl = Duration::from_secs(60);
            store.claim_gate(&key, "T1", ttl).await.unwrap();
            for w in &words {
                store.append(&key, &event(w.clone())).await.unwrap();
            }

            let outcome = run_gate_loop(
                store.clone(),
                key.clone(),
                "T1".into(),
                ttl,
                Duration::from_millis(10),
                |_msgs| async { OnBatchOutcome::Continue },
            )
            .await;

            prop_assert_eq!(outcome, GateLoopOutcome::Drained);
            prop_assert!(store.claim_gate(&key, "T2", ttl).await.unwrap());
            Ok(())
        })?;
    }
}
