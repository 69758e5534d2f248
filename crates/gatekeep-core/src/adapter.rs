// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The platform adapter is an external collaborator (ingress/egress is
//! out of scope), but the processor still needs something to hand the
//! final reply text to. This is that seam: a minimal send-only
//! capability, with an in-memory recorder for tests.

use async_trait::async_trait;

/// The routing information the last message in a batch supplies for the
/// outbound reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyContext {
    pub platform: String,
    pub channel_id: String,
    pub message_id: Option<String>,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    async fn send_reply(&self, ctx: &ReplyContext, text: &str) -> anyhow::Result<()>;
}

/// Records every reply it's asked to send; used by tests in place of a
/// real platform connection.
#[derive(Default)]
pub struct RecordingAdapter {
    pub sent: std::sync::Mutex<Vec<(ReplyContext, String)>>,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl Adapter for RecordingAdapter {
    async fn send_reply(&self, ctx: &ReplyContext, text: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((ctx.clone(), text.to_string()));
        Ok(())
    }
}

/// Stand-in production adapter: logs the reply instead of pushing it to a
/// chat platform. Platform ingress/egress is out of scope here; this is
/// the seam a real Discord/Slack/etc. connector plugs into.
pub struct LoggingAdapter;

#[async_trait]
impl Adapter for LoggingAdapter {
    async fn send_reply(&self, ctx: &ReplyContext, text: &str) -> anyhow::Result<()> {
        tracing::info!(
            platform = %ctx.platform,
            channel_id = %ctx.channel_id,
            message_id = ?ctx.message_id,
            reply = %text,
            "reply ready for platform egress"
        );
        Ok(())
    }
}
