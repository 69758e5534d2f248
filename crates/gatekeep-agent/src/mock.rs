// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Pre-scripted `AgentClient` for tests: each call to `prompt` pops the
//! next scripted outcome off the front of its queue, the same shape as
//! this workspace's scripted model-provider test double.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::AgentClient;
use crate::error::AgentError;
use crate::types::{PromptPart, PromptRequest, PromptResponse, SessionInfo};
use crate::AgentMessage;

pub enum ScriptedPrompt {
    Reply(String),
    Fail(AgentError),
}

#[derive(Default)]
pub struct ScriptedAgentClient {
    prompt_script: Mutex<VecDeque<ScriptedPrompt>>,
    list_messages_script: Mutex<VecDeque<Vec<AgentMessage>>>,
    session_counter: Mutex<u64>,
    /// Every prompt request this client has seen, for test assertions.
    pub requests: Mutex<Vec<PromptRequest>>,
}

impl ScriptedAgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, text: impl Into<String>) {
        self.prompt_script
            .lock()
            .unwrap()
            .push_back(ScriptedPrompt::Reply(text.into()));
    }

    pub fn push_failure(&self, err: AgentError) {
        self.prompt_script.lock().unwrap().push_back(ScriptedPrompt::Fail(err));
    }

    pub fn push_list_messages(&self, messages: Vec<AgentMessage>) {
        self.list_messages_script.lock().unwrap().push_back(messages);
    }
}

#[async_trait]
impl AgentClient for ScriptedAgentClient {
    async fn create_session(
        &self,
        _directory: &str,
        _title: Option<&str>,
    ) -> Result<SessionInfo, AgentError> {
        let mut counter = self.session_counter.lock().unwrap();
        *counter += 1;
        Ok(SessionInfo {
            id: format!("ses_mock{:04}", *counter),
        })
    }

    async fn get_session(
        &self,
        _directory: &str,
        session_id: &str,
    ) -> Result<Option<SessionInfo>, AgentError> {
        Ok(Some(SessionInfo {
            id: session_id.to_string(),
        }))
    }

    async fn delete_session(&self, _directory: &str, _session_id: &str) -> Result<bool, AgentError> {
        Ok(true)
    }

    async fn list_messages(
        &self,
        _directory: &str,
        _session_id: &str,
    ) -> Result<Vec<AgentMessage>, AgentError> {
        Ok(self
            .list_messages_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn prompt(&self, req: PromptRequest) -> Result<PromptResponse, AgentError> {
        self.requests.lock().unwrap().push(req.clone());
        match self.prompt_script.lock().unwrap().pop_front() {
            Some(ScriptedPrompt::Reply(text)) => Ok(PromptResponse {
                info: SessionInfo {
                    id: req.session_id,
                },
                parts: vec![PromptPart::Text { text }],
            }),
            Some(ScriptedPrompt::Fail(err)) => Err(err),
            None => Ok(PromptResponse {
                info: SessionInfo {
                    id: req.session_id,
                },
                parts: vec![],
            }),
        }
    }
}
