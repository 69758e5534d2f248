// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-conversation message buffer, gate token, and last-active index.
//!
//! Every multi-step contract here is atomic with
//! respect to other callers on the same key. The Redis-backed
//! implementation gets this from server-side Lua scripts, never from
//! client-side read-then-write.

mod error;
pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use gatekeep_types::{ConversationKey, SessionEvent};

pub use error::BufferError;
pub use memory::{InMemoryActivityIndex, InMemoryBufferStore};
pub use redis_store::{RedisActivityIndex, RedisBufferStore};

/// Default gate TTL and heartbeat bounds. The TTL used at runtime is
/// supplied by configuration; these are the fallbacks when nothing
/// overrides them.
pub const DEFAULT_GATE_TTL: Duration = Duration::from_secs(60);

#[async_trait]
pub trait BufferStore: Send + Sync {
    /// Push `msg` onto the tail of the buffer.
    async fn append(&self, key: &ConversationKey, msg: &SessionEvent) -> Result<(), BufferError>;

    /// Push `msgs` onto the head, preserving their mutual order.
    async fn requeue_front(
        &self,
        key: &ConversationKey,
        msgs: &[SessionEvent],
    ) -> Result<(), BufferError>;

    /// Push `msg` to the tail, then claim the gate with `token` iff absent.
    /// Returns `Some(token)` iff the gate was newly acquired by this call.
    async fn append_and_request_job(
        &self,
        key: &ConversationKey,
        msg: &SessionEvent,
        token: &str,
        ttl: Duration,
    ) -> Result<Option<String>, BufferError>;

    /// Atomically read the whole list then delete it. Entries that fail
    /// to decode are dropped (and logged by the caller); decoding is not
    /// itself a hard error for the batch.
    async fn drain(&self, key: &ConversationKey) -> Result<Vec<SessionEvent>, BufferError>;

    /// Claim the gate: set it if absent, refresh TTL if it already equals
    /// `token`, else fail.
    async fn claim_gate(
        &self,
        key: &ConversationKey,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, BufferError>;

    /// Extend the gate's TTL iff its current value equals `token`.
    async fn refresh_gate(
        &self,
        key: &ConversationKey,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, BufferError>;

    /// If the buffer is non-empty, fail (another producer beat us to it).
    /// Otherwise delete the gate iff it is absent or equals `token`.
    async fn try_release_gate(
        &self,
        key: &ConversationKey,
        token: &str,
    ) -> Result<bool, BufferError>;

    /// Unconditional delete of the gate iff its value equals `token`.
    async fn release_gate(&self, key: &ConversationKey, token: &str) -> Result<bool, BufferError>;
}

#[async_trait]
pub trait ActivityIndex: Send + Sync {
    async fn record_activity(&self, key: &ConversationKey, at_ms: i64) -> Result<(), BufferError>;

    /// Members scored at or below `cutoff_ms`. Malformed members are
    /// removed from the index as a side effect and excluded from the
    /// returned list.
    async fn fetch_expired(&self, cutoff_ms: i64) -> Result<Vec<ConversationKey>, BufferError>;

    async fn remove(&self, key: &ConversationKey) -> Result<(), BufferError>;
}

/// `encodeMember(botId, groupId, sessionId)` — shared by both
/// implementations so the wire format only lives in one place.
pub fn encode_member(key: &ConversationKey) -> String {
    key.encode()
}

/// The inverse of [`encode_member`]. Returns `None` for anything that
/// isn't exactly three non-empty safe-segment-shaped colon-separated
/// parts — callers treat that as a malformed member to repair.
pub fn decode_member(member: &str) -> Option<ConversationKey> {
    let mut parts = member.split(':');
    let bot = parts.next()?;
    let group = parts.next()?;
    let session = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let bot_id = gatekeep_types::Identifier::parse(bot).ok()?;
    let group_id = gatekeep_types::Identifier::parse(group).ok()?;
    let session_id = gatekeep_types::Identifier::parse(session).ok()?;
    Some(ConversationKey::new(bot_id, group_id, session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeep_types::Identifier;

    fn key(bot: &str, group: &str, session: &str) -> ConversationKey {
        ConversationKey::new(
            Identifier::parse(bot).unwrap(),
            Identifier::parse(group).unwrap(),
            Identifier::parse(session).unwrap(),
        )
    }

    #[test]
    fn member_roundtrips() {
        let k = key("b1", "g1", "s1");
        assert_eq!(decode_member(&encode_member(&k)).unwrap(), k);
    }

    #[test]
    fn malformed_member_does_not_decode() {
        assert!(decode_member("b1:g1").is_none());
        assert!(decode_member("b1:g1:s1:extra").is_none());
        assert!(decode_member("../etc:g1:s1").is_none());
        assert!(decode_member("").is_none());
    }
}
