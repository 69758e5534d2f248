// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-job orchestration: claim the gate, drive the gate loop,
//! and on every batch ensure the session exists, build the agent
//! request, run it with retries and timeout recovery, then send the
//! reply and append history.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gatekeep_agent::{
    is_recognizable_session_id, AgentClient, AgentMessage, ModelRef, PromptPart, PromptRequest,
};
use gatekeep_buffer::{ActivityIndex, BufferStore};
use gatekeep_config::ModelSelection;
use gatekeep_history::HistoryStore;
use gatekeep_session::SessionRepository;
use gatekeep_types::{
    ConversationKey, HistoryEntry, HistoryKey, SessionEvent, SessionJobData, SessionMeta,
};
use tokio::sync::Mutex as AsyncMutex;

use crate::adapter::{Adapter, ReplyContext};
use crate::error::ProcessorError;
use crate::gate_loop::{run_gate_loop, GateLoopOutcome, OnBatchOutcome};
use crate::redact::redact;
use crate::tool_policy::{DefaultToolPolicyClassifier, ToolPolicyClassifier};

const RETRY_ATTEMPTS: u32 = 3;
const APOLOGY_TEXT: &str =
    "Sorry, I wasn't able to get a response that time. Please try again.";
const PROMPT_TOO_BIG_TEXT: &str = "Sorry, that message is too long for me to process.";

pub struct ProcessorConfig {
    pub agent_system_prompt: String,
    pub model_selection: ModelSelection,
    pub prompt_max_bytes: usize,
    pub gate_ttl: Duration,
    pub heartbeat_interval: Duration,
}

pub struct SessionProcessor {
    buffer: Arc<dyn BufferStore>,
    activity: Arc<dyn ActivityIndex>,
    history: Arc<dyn HistoryStore>,
    sessions: Arc<dyn SessionRepository>,
    agent: Arc<dyn AgentClient>,
    adapter: Arc<dyn Adapter>,
    tool_classifier: Arc<dyn ToolPolicyClassifier>,
    config: ProcessorConfig,
}

/// State shared across every `onBatch` invocation within a single job,
/// so "first time in this job" work (ensure-session, workspace, agent
/// session id) only happens once even if the gate loop drains more
/// than one batch.
struct JobState {
    meta: SessionMeta,
    directory: String,
    agent_session_id: String,
}

impl SessionProcessor {
    pub fn new(
        buffer: Arc<dyn BufferStore>,
        activity: Arc<dyn ActivityIndex>,
        history: Arc<dyn HistoryStore>,
        sessions: Arc<dyn SessionRepository>,
        agent: Arc<dyn AgentClient>,
        adapter: Arc<dyn Adapter>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            buffer,
            activity,
            history,
            sessions,
            agent,
            adapter,
            tool_classifier: Arc::new(DefaultToolPolicyClassifier),
            config,
        }
    }

    pub fn with_tool_classifier(mut self, classifier: Arc<dyn ToolPolicyClassifier>) -> Self {
        self.tool_classifier = classifier;
        self
    }

    /// Entry point. Takes `Arc<Self>` so the gate loop's batch
    /// callback can hold a live reference across awaits without a
    /// lifetime fight.
    pub async fn process(self: Arc<Self>, job: SessionJobData) -> Result<(), ProcessorError> {
        let key = job.conversation_key();

        if !self
            .buffer
            .claim_gate(&key, &job.gate_token, self.config.gate_ttl)
            .await?
        {
            tracing::info!(
                bot_id = %job.bot_id,
                group_id = %job.group_id,
                session_id = %job.session_id,
                "gate already held by another owner; skipping duplicate dispatch"
            );
            return Ok(());
        }

        let state: Arc<AsyncMutex<Option<JobState>>> = Arc::new(AsyncMutex::new(None));
        let last_error: Arc<AsyncMutex<Option<ProcessorError>>> = Arc::new(AsyncMutex::new(None));

        let this = self.clone();
        let state_for_loop = state.clone();
        let last_error_for_loop = last_error.clone();
        let outcome = run_gate_loop(
            self.buffer.clone(),
            key.clone(),
            job.gate_token.clone(),
            self.config.gate_ttl,
            self.config.heartbeat_interval,
            move |msgs| {
                let this = this.clone();
                let state = state_for_loop.clone();
                let last_error = last_error_for_loop.clone();
                let job = job.clone();
                let key = key.clone();
                async move {
                    match this.on_batch(&key, &job, &state, msgs.clone()).await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            tracing::error!(error = %err, "onBatch failed; requeuing drained messages");
                            if let Err(requeue_err) = this.buffer.requeue_front(&key, &msgs).await
                            {
                                tracing::error!(error = %requeue_err, "failed to requeue after onBatch error");
                            }
                            *last_error.lock().await = Some(err);
                            OnBatchOutcome::LostGate
                        }
                    }
                }
            },
        )
        .await;

        self.finalize_job(&state, outcome).await;

        if let Some(err) = last_error.lock().await.take() {
            return Err(err);
        }
        Ok(())
    }

    async fn finalize_job(&self, state: &AsyncMutex<Option<JobState>>, outcome: GateLoopOutcome) {
        let mut guard = state.lock().await;
        let Some(job_state) = guard.as_mut() else {
            return;
        };
        // Only a clean drain means we still own the gate; a lost-gate
        // exit must not touch status the new holder now owns.
        if matches!(outcome, GateLoopOutcome::Drained) {
            job_state.meta.mark_idle(Utc::now());
            if let Err(err) = self.sessions.update_meta(&job_state.meta).await {
                tracing::warn!(error = %err, "failed to mark session idle on exit");
            }
        }
    }

    async fn on_batch(
        &self,
        key: &ConversationKey,
        job: &SessionJobData,
        state: &AsyncMutex<Option<JobState>>,
        msgs: Vec<SessionEvent>,
    ) -> Result<OnBatchOutcome, ProcessorError> {
        let now = Utc::now();
        let last = msgs
            .last()
            .expect("run_gate_loop only calls onBatch with a non-empty batch");
        let reply_ctx = ReplyContext {
            platform: last.platform.clone(),
            channel_id: last.channel_id.clone(),
            message_id: last.message_id.clone(),
        };

        let mut guard = state.lock().await;
        if guard.is_none() {
            let (mut meta, directory) = self.ensure_session_meta(key, job, now).await?;
            match self.ensure_agent_session_id(&mut meta, &directory).await {
                Ok(agent_session_id) => {
                    *guard = Some(JobState {
                        meta,
                        directory,
                        agent_session_id,
                    });
                }
                Err(err) => {
                    // ensureAgentSessionId failing is its own failure mode,
                    // distinct from an unexpected onBatch error: one canned
                    // apology, no history append, keep the gate loop going.
                    tracing::warn!(error = %err, "ensureAgentSessionId failed; sending apology");
                    metrics::counter!("gatekeep_agent_session_init_failed_total").increment(1);
                    self.send_apology(&reply_ctx, APOLOGY_TEXT).await;
                    return Ok(OnBatchOutcome::Continue);
                }
            }
        }
        let job_state = guard.as_mut().expect("just initialized above");

        let merged = merge_messages(&msgs);
        let (provider_id, model_id) = self.config.model_selection.resolve(None);
        let tools = self.tool_classifier.classify(&job_state.meta).allowed_tools();
        let system = self.build_system_prompt(&job_state.meta);
        let resolved_input = if merged.is_empty() { " ".to_string() } else { merged.clone() };

        let total_bytes = system.len() + resolved_input.len();
        if total_bytes > self.config.prompt_max_bytes {
            metrics::counter!("gatekeep_prompt_too_big_total").increment(1);
            self.send_apology(&reply_ctx, PROMPT_TOO_BIG_TEXT).await;
            return Ok(OnBatchOutcome::Continue);
        }

        let request = PromptRequest {
            directory: job_state.directory.clone(),
            session_id: job_state.agent_session_id.clone(),
            system,
            model: ModelRef {
                provider_id: provider_id.to_string(),
                model_id: model_id.to_string(),
            },
            tools,
            parts: vec![PromptPart::Text { text: resolved_input }],
            message_id: last.message_id.as_ref().map(|id| format!("msg_{id}")),
        };

        let turn_started_at = now;
        let outcome = self.run_prompt_with_recovery(request, turn_started_at, job_state).await?;

        // Re-check ownership before sending: by the time the prompt
        // resolves, the heartbeat may have lost the race and another
        // holder may already be driving this conversation.
        if !self
            .buffer
            .claim_gate(key, &job.gate_token, self.config.gate_ttl)
            .await?
        {
            self.buffer.requeue_front(key, &msgs).await?;
            return Ok(OnBatchOutcome::LostGate);
        }

        match outcome {
            PromptOutcome::Replied(text) => {
                let safe_text = redact(&text);
                self.adapter
                    .send_reply(&reply_ctx, &safe_text)
                    .await
                    .map_err(ProcessorError::Adapter)?;
                self.append_history(job, &msgs, &merged, &safe_text).await?;
                metrics::counter!("gatekeep_turns_completed_total").increment(1);
            }
            PromptOutcome::Apology => {
                metrics::counter!("gatekeep_turns_apologized_total").increment(1);
                self.send_apology(&reply_ctx, APOLOGY_TEXT).await;
            }
        }

        self.activity.record_activity(key, Utc::now().timestamp_millis()).await?;
        Ok(OnBatchOutcome::Continue)
    }

    /// Loads or creates the session's metadata and workspace directory.
    /// Does not resolve the agent session id: that failure is handled
    /// separately by the caller, which needs to distinguish it from any
    /// other unexpected error here.
    async fn ensure_session_meta(
        &self,
        key: &ConversationKey,
        job: &SessionJobData,
        now: DateTime<Utc>,
    ) -> Result<(SessionMeta, String), ProcessorError> {
        let mut meta = match self.sessions.load_session(key, &job.user_id).await? {
            Some(meta) => meta,
            None => {
                let meta = SessionMeta::new(
                    job.session_id.clone(),
                    job.group_id.clone(),
                    job.bot_id.clone(),
                    job.user_id.clone(),
                    job.key,
                    now,
                );
                self.sessions.create_session(&meta).await?;
                meta
            }
        };
        self.activity.record_activity(key, now.timestamp_millis()).await?;
        meta.mark_running(now);
        self.sessions.update_meta(&meta).await?;

        let directory = self
            .sessions
            .ensure_workspace(key, &job.user_id)
            .await?
            .display()
            .to_string();

        Ok((meta, directory))
    }

    async fn ensure_agent_session_id(
        &self,
        meta: &mut SessionMeta,
        directory: &str,
    ) -> Result<String, ProcessorError> {
        if let Some(existing) = meta.agent_session_id.clone() {
            if is_recognizable_session_id(&existing) {
                if let Some(info) = self.agent.get_session(directory, &existing).await? {
                    return Ok(info.id);
                }
            }
        }
        let info = self.agent.create_session(directory, None).await?;
        meta.set_agent_session_id(info.id.clone(), Utc::now());
        self.sessions.update_meta(meta).await?;
        Ok(info.id)
    }

    fn build_system_prompt(&self, meta: &SessionMeta) -> String {
        format!("{}\n\nUser: {}", self.config.agent_system_prompt, meta.owner_id.as_str())
    }

    async fn run_prompt_with_recovery(
        &self,
        request: PromptRequest,
        turn_started_at: DateTime<Utc>,
        job_state: &JobState,
    ) -> Result<PromptOutcome, ProcessorError> {
        let mut backoff = Duration::from_secs(1);
        for attempt in 0..RETRY_ATTEMPTS {
            match self.agent.prompt(request.clone()).await {
                Ok(resp) => {
                    let text = resp.assistant_text();
                    if !text.is_empty() {
                        return Ok(PromptOutcome::Replied(text));
                    }
                    break;
                }
                Err(err) if err.is_retryable() && attempt + 1 < RETRY_ATTEMPTS => {
                    tracing::warn!(error = %err, attempt, "agent prompt failed; retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "agent prompt failed with no more retries");
                    break;
                }
            }
        }

        match self
            .agent
            .list_messages(&job_state.directory, &job_state.agent_session_id)
            .await
        {
            Ok(messages) => {
                if let Some(text) = newest_fresh_assistant_text(&messages, turn_started_at) {
                    metrics::counter!("gatekeep_timeout_recoveries_total").increment(1);
                    return Ok(PromptOutcome::Replied(text));
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "timeout-recovery listMessages call failed");
            }
        }
        Ok(PromptOutcome::Apology)
    }

    async fn send_apology(&self, ctx: &ReplyContext, text: &str) {
        if let Err(err) = self.adapter.send_reply(ctx, text).await {
            tracing::warn!(error = %err, "failed to send apology reply");
        }
    }

    async fn append_history(
        &self,
        job: &SessionJobData,
        msgs: &[SessionEvent],
        merged_content: &str,
        assistant_text: &str,
    ) -> Result<(), ProcessorError> {
        let bot_account_id = msgs
            .last()
            .map(|m| m.bot_account_id())
            .unwrap_or_else(|| job.bot_id.to_string());
        let history_key = HistoryKey::new(bot_account_id, job.user_id.as_str());

        // One user entry per turn, not per drained message: the batch was
        // already merged into a single prompt, so history should mirror
        // what the agent actually saw.
        let original_timestamp = msgs
            .first()
            .map(|m| m.timestamp)
            .unwrap_or_else(Utc::now);
        self.history
            .append_history(&history_key, HistoryEntry::user(merged_content, original_timestamp))
            .await?;
        self.history
            .append_history(&history_key, HistoryEntry::assistant(assistant_text, Utc::now()))
            .await?;
        Ok(())
    }
}

enum PromptOutcome {
    Replied(String),
    Apology,
}

fn merge_messages(msgs: &[SessionEvent]) -> String {
    msgs.iter()
        .map(SessionEvent::trimmed_content)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn newest_fresh_assistant_text(
    messages: &[AgentMessage],
    turn_started_at: DateTime<Utc>,
) -> Option<String> {
    messages
        .iter()
        .filter(|m| m.is_assistant() && m.time.created > turn_started_at)
        .max_by_key(|m| m.time.created)
        .map(AgentMessage::text)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RecordingAdapter;
    use async_trait::async_trait;
    use gatekeep_agent::{AgentError, AgentMessageTime, ScriptedAgentClient};
    use gatekeep_buffer::{InMemoryActivityIndex, InMemoryBufferStore};
    use gatekeep_history::InMemoryHistoryStore;
    use gatekeep_session::FileSessionRepository;
    use gatekeep_types::{Identifier, ReadOptions};
    use tempfile::tempdir;

    fn event(content: &str, message_id: &str) -> SessionEvent {
        SessionEvent {
            platform: "discord".into(),
            self_id: "bot1".into(),
            user_id: "u1".into(),
            channel_id: "c1".into(),
            guild_id: None,
            message_id: Some(message_id.into()),
            content: content.into(),
            elements: Vec::new(),
            timestamp: Utc::now(),
            extras: serde_json::Value::Null,
        }
    }

    fn job() -> SessionJobData {
        SessionJobData {
            bot_id: Identifier::parse("b1").unwrap(),
            group_id: Identifier::parse("g1").unwrap(),
            session_id: Identifier::parse("s1").unwrap(),
            user_id: Identifier::parse("u1").unwrap(),
            key: 0,
            gate_token: "T1".into(),
            trace_id: None,
            enqueued_at: None,
        }
    }

    fn base_config() -> ProcessorConfig {
        ProcessorConfig {
            agent_system_prompt: "You are a helpful assistant.".into(),
            model_selection: ModelSelection::Default,
            prompt_max_bytes: 200_000,
            gate_ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_millis(20),
        }
    }

    struct Fixture {
        processor: Arc<SessionProcessor>,
        buffer: Arc<InMemoryBufferStore>,
        agent: Arc<ScriptedAgentClient>,
        adapter: Arc<RecordingAdapter>,
        history: Arc<InMemoryHistoryStore>,
    }

    fn build(data_dir: &std::path::Path) -> Fixture {
        let buffer = Arc::new(InMemoryBufferStore::new());
        let activity = Arc::new(InMemoryActivityIndex::new());
        let history = Arc::new(InMemoryHistoryStore::new());
        let sessions = Arc::new(FileSessionRepository::new(data_dir));
        let agent = Arc::new(ScriptedAgentClient::new());
        let adapter = Arc::new(RecordingAdapter::new());

        let processor = Arc::new(SessionProcessor::new(
            buffer.clone() as Arc<dyn BufferStore>,
            activity as Arc<dyn ActivityIndex>,
            history.clone() as Arc<dyn HistoryStore>,
            sessions as Arc<dyn SessionRepository>,
            agent.clone() as Arc<dyn AgentClient>,
            adapter.clone() as Arc<dyn Adapter>,
            base_config(),
        ));
        Fixture {
            processor,
            buffer,
            agent,
            adapter,
            history,
        }
    }

    #[tokio::test]
    async fn single_turn_happy_path_sends_reply_and_records_history() {
        let dir = tempdir().unwrap();
        let fx = build(dir.path());
        fx.agent.push_reply("hello");

        let job = job();
        let key = job.conversation_key();
        fx.buffer
            .append_and_request_job(&key, &event("hi", "m1"), &job.gate_token, Duration::from_secs(60))
            .await
            .unwrap();

        fx.processor.process(job).await.unwrap();

        assert_eq!(fx.adapter.sent_texts(), vec!["hello".to_string()]);
        let hk = HistoryKey::new("discord:bot1", "u1");
        let entries = fx.history.read_history(&hk, ReadOptions::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "hi");
        assert_eq!(entries[1].content, "hello");

        // gate is released at the end of a clean drain
        assert!(fx.buffer.claim_gate(&key, "someone-else", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn two_messages_are_coalesced_into_one_prompt() {
        let dir = tempdir().unwrap();
        let fx = build(dir.path());
        fx.agent.push_reply("ok");

        let job = job();
        let key = job.conversation_key();
        fx.buffer
            .append_and_request_job(&key, &event("a", "m1"), &job.gate_token, Duration::from_secs(60))
            .await
            .unwrap();
        fx.buffer.append(&key, &event("b", "m2")).await.unwrap();

        fx.processor.process(job).await.unwrap();

        let requests = fx.agent.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let sent_text = match &requests[0].parts[0] {
            PromptPart::Text { text } => text.clone(),
        };
        assert_eq!(sent_text, "a\nb");
        assert_eq!(fx.adapter.sent_texts(), vec!["ok".to_string()]);

        // history mirrors what was actually sent: one merged user entry,
        // not one per drained message.
        let hk = HistoryKey::new("discord:bot1", "u1");
        let entries = fx.history.read_history(&hk, ReadOptions::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "a\nb");
        assert_eq!(entries[1].content, "ok");
    }

    #[tokio::test]
    async fn gate_stolen_before_dispatch_is_a_silent_no_op() {
        let dir = tempdir().unwrap();
        let fx = build(dir.path());
        fx.agent.push_reply("should not be used");

        let job = job();
        let key = job.conversation_key();
        fx.buffer
            .append_and_request_job(&key, &event("a", "m1"), &job.gate_token, Duration::from_secs(60))
            .await
            .unwrap();
        // a different owner grabs the gate before this job gets dispatched
        fx.buffer.release_gate(&key, &job.gate_token).await.unwrap();
        fx.buffer.claim_gate(&key, "T2", Duration::from_secs(60)).await.unwrap();

        fx.processor.process(job).await.unwrap();

        assert!(fx.adapter.sent_texts().is_empty());
        assert_eq!(fx.agent.requests.lock().unwrap().len(), 0);
        // the message is left for whoever holds the gate now
        assert_eq!(fx.buffer.drain(&key).await.unwrap().len(), 1);
    }

    /// An `AgentClient` that steals the conversation's gate out from
    /// under the caller the moment `prompt` is invoked, modelling
    /// another worker taking over mid-turn ("gate lost during run").
    struct GateStealingAgent {
        inner: Arc<ScriptedAgentClient>,
        buffer: Arc<InMemoryBufferStore>,
        key: ConversationKey,
    }

    #[async_trait]
    impl AgentClient for GateStealingAgent {
        async fn create_session(
            &self,
            directory: &str,
            title: Option<&str>,
        ) -> Result<gatekeep_agent::SessionInfo, AgentError> {
            self.inner.create_session(directory, title).await
        }

        async fn get_session(
            &self,
            directory: &str,
            session_id: &str,
        ) -> Result<Option<gatekeep_agent::SessionInfo>, AgentError> {
            self.inner.get_session(directory, session_id).await
        }

        async fn delete_session(&self, directory: &str, session_id: &str) -> Result<bool, AgentError> {
            self.inner.delete_session(directory, session_id).await
        }

        async fn list_messages(
            &self,
            directory: &str,
            session_id: &str,
        ) -> Result<Vec<AgentMessage>, AgentError> {
            self.inner.list_messages(directory, session_id).await
        }

        async fn prompt(
            &self,
            req: PromptRequest,
        ) -> Result<gatekeep_agent::PromptResponse, AgentError> {
            self.buffer.release_gate(&self.key, "T1").await.unwrap();
            self.buffer.claim_gate(&self.key, "T2", Duration::from_secs(60)).await.unwrap();
            self.inner.prompt(req).await
        }
    }

    #[tokio::test]
    async fn gate_lost_during_run_requeues_without_sending_a_reply() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(InMemoryBufferStore::new());
        let activity = Arc::new(InMemoryActivityIndex::new());
        let history = Arc::new(InMemoryHistoryStore::new());
        let sessions = Arc::new(FileSessionRepository::new(dir.path()));
        let inner_agent = Arc::new(ScriptedAgentClient::new());
        inner_agent.push_reply("SECOND=X");
        let adapter = Arc::new(RecordingAdapter::new());

        let job = job();
        let key = job.conversation_key();
        let agent = Arc::new(GateStealingAgent {
            inner: inner_agent,
            buffer: buffer.clone(),
            key: key.clone(),
        });

        let processor = Arc::new(SessionProcessor::new(
            buffer.clone() as Arc<dyn BufferStore>,
            activity as Arc<dyn ActivityIndex>,
            history.clone() as Arc<dyn HistoryStore>,
            sessions as Arc<dyn SessionRepository>,
            agent as Arc<dyn AgentClient>,
            adapter.clone() as Arc<dyn Adapter>,
            base_config(),
        ));

        buffer
            .append_and_request_job(&key, &event("a", "m1"), &job.gate_token, Duration::from_secs(60))
            .await
            .unwrap();

        processor.process(job).await.unwrap();

        assert!(adapter.sent_texts().is_empty());
        let hk = HistoryKey::new("discord:bot1", "u1");
        assert!(history.read_history(&hk, ReadOptions::default()).await.unwrap().is_empty());
        // requeued for whoever now holds the gate
        assert_eq!(buffer.drain(&key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn prompt_too_big_sends_apology_without_history() {
        let dir = tempdir().unwrap();
        let fx = build(dir.path());

        let mut processor = Arc::try_unwrap(fx.processor).unwrap_or_else(|_| unreachable!());
        processor.config.prompt_max_bytes = 4;
        let processor = Arc::new(processor);

        let job = job();
        let key = job.conversation_key();
        fx.buffer
            .append_and_request_job(
                &key,
                &event("this is way too long", "m1"),
                &job.gate_token,
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        processor.process(job).await.unwrap();

        assert_eq!(fx.adapter.sent_texts(), vec![PROMPT_TOO_BIG_TEXT.to_string()]);
        let hk = HistoryKey::new("discord:bot1", "u1");
        assert!(fx.history.read_history(&hk, ReadOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_then_fresh_assistant_message_is_recovered() {
        let dir = tempdir().unwrap();
        let fx = build(dir.path());

        fx.agent.push_failure(AgentError::Timeout);
        fx.agent.push_failure(AgentError::Timeout);
        fx.agent.push_failure(AgentError::Timeout);

        let job = job();
        let key = job.conversation_key();
        fx.buffer
            .append_and_request_job(&key, &event("hi", "m1"), &job.gate_token, Duration::from_secs(60))
            .await
            .unwrap();

        fx.agent.push_list_messages(vec![AgentMessage {
            role: "assistant".into(),
            time: AgentMessageTime {
                created: Utc::now() + chrono::Duration::seconds(5),
            },
            parts: vec![PromptPart::Text { text: "RECOVERED".into() }],
        }]);

        fx.processor.process(job).await.unwrap();

        assert_eq!(fx.adapter.sent_texts(), vec!["RECOVERED".to_string()]);
    }

    #[tokio::test]
    async fn timeout_with_only_stale_messages_sends_apology_not_a_replay() {
        let dir = tempdir().unwrap();
        let fx = build(dir.path());

        fx.agent.push_failure(AgentError::Timeout);
        fx.agent.push_failure(AgentError::Timeout);
        fx.agent.push_failure(AgentError::Timeout);

        let job = job();
        let key = job.conversation_key();
        fx.buffer
            .append_and_request_job(&key, &event("hi", "m1"), &job.gate_token, Duration::from_secs(60))
            .await
            .unwrap();

        fx.agent.push_list_messages(vec![AgentMessage {
            role: "assistant".into(),
            time: AgentMessageTime {
                created: Utc::now() - chrono::Duration::seconds(30),
            },
            parts: vec![PromptPart::Text { text: "SECOND=X".into() }],
        }]);

        fx.processor.process(job).await.unwrap();

        assert_eq!(fx.adapter.sent_texts(), vec![APOLOGY_TEXT.to_string()]);
        let hk = HistoryKey::new("discord:bot1", "u1");
        assert!(fx.history.read_history(&hk, ReadOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_id_recovery_creates_a_new_session_when_none_is_stored() {
        let dir = tempdir().unwrap();
        let fx = build(dir.path());
        fx.agent.push_reply("hello");

        let job = job();
        let key = job.conversation_key();
        fx.buffer
            .append_and_request_job(&key, &event("hi", "m1"), &job.gate_token, Duration::from_secs(60))
            .await
            .unwrap();

        fx.processor.process(job).await.unwrap();

        let requests = fx.agent.requests.lock().unwrap();
        assert!(requests[0].session_id.starts_with("ses_mock"));
    }

    /// An `AgentClient` whose `create_session` always fails, modelling
    /// `ensureAgentSessionId` throwing when no reusable session id exists.
    struct SessionInitFailingAgent {
        inner: Arc<ScriptedAgentClient>,
    }

    #[async_trait]
    impl AgentClient for SessionInitFailingAgent {
        async fn create_session(
            &self,
            _directory: &str,
            _title: Option<&str>,
        ) -> Result<gatekeep_agent::SessionInfo, AgentError> {
            Err(AgentError::Timeout)
        }

        async fn get_session(
            &self,
            directory: &str,
            session_id: &str,
        ) -> Result<Option<gatekeep_agent::SessionInfo>, AgentError> {
            self.inner.get_session(directory, session_id).await
        }

        async fn delete_session(&self, directory: &str, session_id: &str) -> Result<bool, AgentError> {
            self.inner.delete_session(directory, session_id).await
        }

        async fn list_messages(
            &self,
            directory: &str,
            session_id: &str,
        ) -> Result<Vec<AgentMessage>, AgentError> {
            self.inner.list_messages(directory, session_id).await
        }

        async fn prompt(
            &self,
            req: PromptRequest,
        ) -> Result<gatekeep_agent::PromptResponse, AgentError> {
            self.inner.prompt(req).await
        }
    }

    #[tokio::test]
    async fn ensure_agent_session_id_failure_sends_apology_and_keeps_the_gate_loop_going() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(InMemoryBufferStore::new());
        let activity = Arc::new(InMemoryActivityIndex::new());
        let history = Arc::new(InMemoryHistoryStore::new());
        let sessions = Arc::new(FileSessionRepository::new(dir.path()));
        let inner_agent = Arc::new(ScriptedAgentClient::new());
        let adapter = Arc::new(RecordingAdapter::new());
        let agent = Arc::new(SessionInitFailingAgent { inner: inner_agent });

        let processor = Arc::new(SessionProcessor::new(
            buffer.clone() as Arc<dyn BufferStore>,
            activity as Arc<dyn ActivityIndex>,
            history.clone() as Arc<dyn HistoryStore>,
            sessions as Arc<dyn SessionRepository>,
            agent as Arc<dyn AgentClient>,
            adapter.clone() as Arc<dyn Adapter>,
            base_config(),
        ));

        let job = job();
        let key = job.conversation_key();
        buffer
            .append_and_request_job(&key, &event("hi", "m1"), &job.gate_token, Duration::from_secs(60))
            .await
            .unwrap();

        // No `Err` out of `process`: the gate loop keeps running and
        // finishes a clean drain rather than requeuing/parking the job.
        processor.process(job).await.unwrap();

        assert_eq!(adapter.sent_texts(), vec![APOLOGY_TEXT.to_string()]);
        let hk = HistoryKey::new("discord:bot1", "u1");
        assert!(history.read_history(&hk, ReadOptions::default()).await.unwrap().is_empty());
        // the gate was released at the end of the drain, not abandoned
        // until TTL expiry.
        assert!(buffer.claim_gate(&key, "someone-else", Duration::from_secs(60)).await.unwrap());
    }
}
