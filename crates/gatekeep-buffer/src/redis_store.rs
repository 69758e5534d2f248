// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Redis-backed `BufferStore` and `ActivityIndex`. Every multi-step
//! contract is a single `redis::Script` EVAL so concurrent callers never
//! observe a half-applied state.

use std::time::Duration;

use async_trait::async_trait;
use gatekeep_types::{ConversationKey, SessionEvent};
use redis::aio::ConnectionManager;
use redis::Script;

use crate::{decode_member, encode_member, ActivityIndex, BufferError, BufferStore};

const ACTIVITY_KEY: &str = "session:last-active";

// Pushes ARGV in original order onto the head, so the list reads
// msgs[0], msgs[1], ... ahead of whatever was already there.
const REQUEUE_FRONT: &str = r#"
for i = #ARGV, 1, -1 do
    redis.call('LPUSH', KEYS[1], ARGV[i])
end
return 1
"#;

const APPEND_AND_REQUEST_JOB: &str = r#"
redis.call('RPUSH', KEYS[1], ARGV[1])
local set = redis.call('SET', KEYS[2], ARGV[2], 'NX', 'EX', ARGV[3])
if set then
    return ARGV[2]
else
    return false
end
"#;

const DRAIN: &str = r#"
local msgs = redis.call('LRANGE', KEYS[1], 0, -1)
if #msgs > 0 then
    redis.call('DEL', KEYS[1])
end
return msgs
"#;

const CLAIM_GATE: &str = r#"
local cur = redis.call('GET', KEYS[1])
if cur == false then
    redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
    return 1
elseif cur == ARGV[1] then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    return 1
else
    return 0
end
"#;

const REFRESH_GATE: &str = r#"
local cur = redis.call('GET', KEYS[1])
if cur == ARGV[1] then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    return 1
else
    return 0
end
"#;

const TRY_RELEASE_GATE: &str = r#"
local len = redis.call('LLEN', KEYS[1])
if len > 0 then
    return 0
end
local cur = redis.call('GET', KEYS[2])
if cur == false then
    return 1
elseif cur == ARGV[1] then
    redis.call('DEL', KEYS[2])
    return 1
else
    return 0
end
"#;

const RELEASE_GATE: &str = r#"
local cur = redis.call('GET', KEYS[1])
if cur == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
else
    return 0
end
"#;

// Filters the zrangebyscore result down to well-formed `bot:group:session`
// members, removing anything else from the set as it goes.
const FETCH_EXPIRED: &str = r#"
local members = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local good = {}
for _, m in ipairs(members) do
    local a, b, c = string.match(m, '^([^:]+):([^:]+):([^:]+)$')
    if a and b and c then
        table.insert(good, m)
    else
        redis.call('ZREM', KEYS[1], m)
    end
end
return good
"#;

pub struct RedisBufferStore {
    conn: ConnectionManager,
    requeue_front: Script,
    append_and_request_job: Script,
    drain: Script,
    claim_gate: Script,
    refresh_gate: Script,
    try_release_gate: Script,
    release_gate: Script,
}

impl RedisBufferStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            requeue_front: Script::new(REQUEUE_FRONT),
            append_and_request_job: Script::new(APPEND_AND_REQUEST_JOB),
            drain: Script::new(DRAIN),
            claim_gate: Script::new(CLAIM_GATE),
            refresh_gate: Script::new(REFRESH_GATE),
            try_release_gate: Script::new(TRY_RELEASE_GATE),
            release_gate: Script::new(RELEASE_GATE),
        }
    }

    fn encode(msg: &SessionEvent) -> Result<String, BufferError> {
        serde_json::to_string(msg).map_err(BufferError::Encode)
    }

    fn decode_batch(raw: Vec<String>) -> Vec<SessionEvent> {
        raw.into_iter()
            .filter_map(|s| match serde_json::from_str::<SessionEvent>(&s) {
                Ok(msg) => Some(msg),
                Err(err) => {
                    tracing::warn!(error = %err, "dropping undecodable buffer entry");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl BufferStore for RedisBufferStore {
    async fn append(&self, key: &ConversationKey, msg: &SessionEvent) -> Result<(), BufferError> {
        let payload = Self::encode(msg)?;
        let mut conn = self.conn.clone();
        redis::cmd("RPUSH")
            .arg(key.buffer_key())
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn requeue_front(
        &self,
        key: &ConversationKey,
        msgs: &[SessionEvent],
    ) -> Result<(), BufferError> {
        if msgs.is_empty() {
            return Ok(());
        }
        let mut invocation = self.requeue_front.key(key.buffer_key());
        for msg in msgs {
            invocation.arg(Self::encode(msg)?);
        }
        let mut conn = self.conn.clone();
        invocation.invoke_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn append_and_request_job(
        &self,
        key: &ConversationKey,
        msg: &SessionEvent,
        token: &str,
        ttl: Duration,
    ) -> Result<Option<String>, BufferError> {
        let payload = Self::encode(msg)?;
        let mut conn = self.conn.clone();
        let result: Option<String> = self
            .append_and_request_job
            .key(key.buffer_key())
            .key(key.gate_key())
            .arg(payload)
            .arg(token)
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await?;
        Ok(result)
    }

    async fn drain(&self, key: &ConversationKey) -> Result<Vec<SessionEvent>, BufferError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = self
            .drain
            .key(key.buffer_key())
            .invoke_async(&mut conn)
            .await?;
        Ok(Self::decode_batch(raw))
    }

    async fn claim_gate(
        &self,
        key: &ConversationKey,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, BufferError> {
        let mut conn = self.conn.clone();
        let ok: i64 = self
            .claim_gate
            .key(key.gate_key())
            .arg(token)
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await?;
        Ok(ok == 1)
    }

    async fn refresh_gate(
        &self,
        key: &ConversationKey,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, BufferError> {
        let mut conn = self.conn.clone();
        let ok: i64 = self
            .refresh_gate
            .key(key.gate_key())
            .arg(token)
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await?;
        Ok(ok == 1)
    }

    async fn try_release_gate(
        &self,
        key: &ConversationKey,
        token: &str,
    ) -> Result<bool, BufferError> {
        let mut conn = self.conn.clone();
        let ok: i64 = self
            .try_release_gate
            .key(key.buffer_key())
            .key(key.gate_key())
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(ok == 1)
    }

    async fn release_gate(&self, key: &ConversationKey, token: &str) -> Result<bool, BufferError> {
        let mut conn = self.conn.clone();
        let ok: i64 = self
            .release_gate
            .key(key.gate_key())
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(ok == 1)
    }
}

pub struct RedisActivityIndex {
    conn: ConnectionManager,
    fetch_expired: Script,
}

impl RedisActivityIndex {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            fetch_expired: Script::new(FETCH_EXPIRED),
        }
    }
}

#[async_trait]
impl ActivityIndex for RedisActivityIndex {
    async fn record_activity(&self, key: &ConversationKey, at_ms: i64) -> Result<(), BufferError> {
        let mut conn = self.conn.clone();
        redis::cmd("ZADD")
            .arg(ACTIVITY_KEY)
            .arg(at_ms)
            .arg(encode_member(key))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn fetch_expired(&self, cutoff_ms: i64) -> Result<Vec<ConversationKey>, BufferError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = self
            .fetch_expired
            .key(ACTIVITY_KEY)
            .arg(cutoff_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(members.into_iter().filter_map(|m| decode_member(&m)).collect())
    }

    async fn remove(&self, key: &ConversationKey) -> Result<(), BufferError> {
        let mut conn = self.conn.clone();
        redis::cmd("ZREM")
            .arg(ACTIVITY_KEY)
            .arg(encode_member(key))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
