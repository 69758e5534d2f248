// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-memory `BufferStore`/`ActivityIndex` for tests: same contracts as
//! the Redis implementation, minus the TTL's wall-clock expiry (property
//! tests drive time explicitly rather than sleeping).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use gatekeep_types::{ConversationKey, SessionEvent};

use crate::{decode_member, encode_member, ActivityIndex, BufferError, BufferStore};

#[derive(Default)]
struct Conversation {
    buffer: VecDeque<SessionEvent>,
    gate: Option<String>,
}

#[derive(Default)]
pub struct InMemoryBufferStore {
    conversations: Mutex<HashMap<ConversationKey, Conversation>>,
}

impl InMemoryBufferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BufferStore for InMemoryBufferStore {
    async fn append(&self, key: &ConversationKey, msg: &SessionEvent) -> Result<(), BufferError> {
        let mut map = self.conversations.lock().unwrap();
        map.entry(key.clone()).or_default().buffer.push_back(msg.clone());
        Ok(())
    }

    async fn requeue_front(
        &self,
        key: &ConversationKey,
        msgs: &[SessionEvent],
    ) -> Result<(), BufferError> {
        let mut map = self.conversations.lock().unwrap();
        let conv = map.entry(key.clone()).or_default();
        for msg in msgs.iter().rev() {
            conv.buffer.push_front(msg.clone());
        }
        Ok(())
    }

    async fn append_and_request_job(
        &self,
        key: &ConversationKey,
        msg: &SessionEvent,
        token: &str,
        _ttl: Duration,
    ) -> Result<Option<String>, BufferError> {
        let mut map = self.conversations.lock().unwrap();
        let conv = map.entry(key.clone()).or_default();
        conv.buffer.push_back(msg.clone());
        if conv.gate.is_none() {
            conv.gate = Some(token.to_string());
            Ok(Some(token.to_string()))
        } else {
            Ok(None)
        }
    }

    async fn drain(&self, key: &ConversationKey) -> Result<Vec<SessionEvent>, BufferError> {
        let mut map = self.conversations.lock().unwrap();
        let conv = map.entry(key.clone()).or_default();
        Ok(conv.buffer.drain(..).collect())
    }

    async fn claim_gate(
        &self,
        key: &ConversationKey,
        token: &str,
        _ttl: Duration,
    ) -> Result<bool, BufferError> {
        let mut map = self.conversations.lock().unwrap();
        let conv = map.entry(key.clone()).or_default();
        match &conv.gate {
            None => {
                conv.gate = Some(token.to_string());
                Ok(true)
            }
            Some(cur) if cur == token => Ok(true),
            Some(_) => Ok(false),
        }
    }

    async fn refresh_gate(
        &self,
        key: &ConversationKey,
        token: &str,
        _ttl: Duration,
    ) -> Result<bool, BufferError> {
        let map = self.conversations.lock().unwrap();
        Ok(map.get(key).and_then(|c| c.gate.as_deref()) == Some(token))
    }

    async fn try_release_gate(
        &self,
        key: &ConversationKey,
        token: &str,
    ) -> Result<bool, BufferError> {
        let mut map = self.conversations.lock().unwrap();
        let conv = map.entry(key.clone()).or_default();
        if !conv.buffer.is_empty() {
            return Ok(false);
        }
        match &conv.gate {
            None => Ok(true),
            Some(cur) if cur == token => {
                conv.gate = None;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    async fn release_gate(&self, key: &ConversationKey, token: &str) -> Result<bool, BufferError> {
        let mut map = self.conversations.lock().unwrap();
        let conv = map.entry(key.clone()).or_default();
        match &conv.gate {
            Some(cur) if cur == token => {
                conv.gate = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryActivityIndex {
    scores: Mutex<HashMap<String, i64>>,
}

impl InMemoryActivityIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityIndex for InMemoryActivityIndex {
    async fn record_activity(&self, key: &ConversationKey, at_ms: i64) -> Result<(), BufferError> {
        self.scores.lock().unwrap().insert(encode_member(key), at_ms);
        Ok(())
    }

    async fn fetch_expired(&self, cutoff_ms: i64) -> Result<Vec<ConversationKey>, BufferError> {
        let mut scores = self.scores.lock().unwrap();
        let mut expired = Vec::new();
        let mut to_remove = Vec::new();
        for (member, score) in scores.iter() {
            if *score > cutoff_ms {
                continue;
            }
            match decode_member(member) {
                Some(key) => expired.push(key),
                None => to_remove.push(member.clone()),
            }
        }
        for member in to_remove {
            scores.remove(&member);
        }
        Ok(expired)
    }

    async fn remove(&self, key: &ConversationKey) -> Result<(), BufferError> {
        self.scores.lock().unwrap().remove(&encode_member(key));
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeep_types::Identifier;

    fn key(s: &str) -> ConversationKey {
        let id = Identifier::parse(s).unwrap();
        ConversationKey::new(id.clone(), id.clone(), id)
    }

    fn event(content: &str) -> SessionEvent {
        SessionEvent {
            platform: "discord".into(),
            self_id: "bot1".into(),
            user_id: "u1".into(),
            channel_id: "c1".into(),
            guild_id: None,
            message_id: None,
            content: content.into(),
            elements: vec![],
            timestamp: chrono::Utc::now(),
            extras: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn append_and_request_job_only_grants_gate_once() {
        let store = InMemoryBufferStore::new();
        let k = key("a");
        let ttl = Duration::from_secs(60);
        let first = store
            .append_and_request_job(&k, &event("a"), "T1", ttl)
            .await
            .unwrap();
        let second = store
            .append_and_request_job(&k, &event("b"), "T2", ttl)
            .await
            .unwrap();
        assert_eq!(first, Some("T1".to_string()));
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn drain_returns_messages_in_append_order_then_empties() {
        let store = InMemoryBufferStore::new();
        let k = key("a");
        store.append(&k, &event("a")).await.unwrap();
        store.append(&k, &event("b")).await.unwrap();
        let drained = store.drain(&k).await.unwrap();
        assert_eq!(
            drained.iter().map(|e| e.content.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(store.drain(&k).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn requeue_front_preserves_order_ahead_of_later_appends() {
        let store = InMemoryBufferStore::new();
        let k = key("a");
        store
            .requeue_front(&k, &[event("a"), event("b")])
            .await
            .unwrap();
        store.append(&k, &event("c")).await.unwrap();
        let drained = store.drain(&k).await.unwrap();
        assert_eq!(
            drained.iter().map(|e| e.content.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn try_release_gate_fails_when_buffer_is_non_empty() {
        let store = InMemoryBufferStore::new();
        let k = key("a");
        let ttl = Duration::from_secs(60);
        store
            .append_and_request_job(&k, &event("a"), "T1", ttl)
            .await
            .unwrap();
        assert!(!store.try_release_gate(&k, "T1").await.unwrap());
    }

    #[tokio::test]
    async fn try_release_gate_succeeds_and_clears_gate_when_buffer_empty() {
        let store = InMemoryBufferStore::new();
        let k = key("a");
        let ttl = Duration::from_secs(60);
        store
            .append_and_request_job(&k, &event("a"), "T1", ttl)
            .await
            .unwrap();
        store.drain(&k).await.unwrap();
        assert!(store.try_release_gate(&k, "T1").await.unwrap());
        assert!(store.claim_gate(&k, "T2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn claim_gate_rejects_mismatched_token() {
        let store = InMemoryBufferStore::new();
        let k = key("a");
        let ttl = Duration::from_secs(60);
        store.claim_gate(&k, "T1", ttl).await.unwrap();
        assert!(!store.claim_gate(&k, "T2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn release_gate_is_a_no_op_for_the_wrong_token() {
        let store = InMemoryBufferStore::new();
        let k = key("a");
        let ttl = Duration::from_secs(60);
        store.claim_gate(&k, "T1", ttl).await.unwrap();
        assert!(!store.release_gate(&k, "T2").await.unwrap());
        assert!(store.release_gate(&k, "T1").await.unwrap());
    }

    #[tokio::test]
    async fn activity_index_fetch_expired_excludes_future_activity() {
        let index = InMemoryActivityIndex::new();
        let a = key("a");
        let b = key("b");
        index.record_activity(&a, 1000).await.unwrap();
        index.record_activity(&b, 5000).await.unwrap();
        let expired = index.fetch_expired(2000).await.unwrap();
        assert_eq!(expired, vec![a]);
    }

    #[tokio::test]
    async fn activity_index_remove_drops_the_member() {
        let index = InMemoryActivityIndex::new();
        let a = key("a");
        index.record_activity(&a, 1000).await.unwrap();
        index.remove(&a).await.unwrap();
        assert!(index.fetch_expired(2000).await.unwrap().is_empty());
    }
}
