// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! HTTP client for the remote code-agent: session lifecycle and the
//! synchronous prompt call, built the way this workspace's OpenAI-compatible
//! model driver is built — a thin `reqwest::Client` wrapper that turns
//! non-2xx responses into a typed error instead of bubbling raw status
//! codes to callers.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;
use crate::types::{CreateSessionRequest, PromptRequest, PromptResponse, SessionInfo};
use crate::AgentMessage;

#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn create_session(
        &self,
        directory: &str,
        title: Option<&str>,
    ) -> Result<SessionInfo, AgentError>;

    /// `Ok(None)` on a 404 — the session no longer exists on the agent side.
    async fn get_session(
        &self,
        directory: &str,
        session_id: &str,
    ) -> Result<Option<SessionInfo>, AgentError>;

    async fn delete_session(&self, directory: &str, session_id: &str) -> Result<bool, AgentError>;

    async fn list_messages(
        &self,
        directory: &str,
        session_id: &str,
    ) -> Result<Vec<AgentMessage>, AgentError>;

    async fn prompt(&self, req: PromptRequest) -> Result<PromptResponse, AgentError>;
}

pub struct HttpAgentClient {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    request_timeout: Duration,
}

impl HttpAgentClient {
    pub fn new(
        base_url: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username,
            password,
            request_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder, directory: &str) -> reqwest::RequestBuilder {
        let builder = builder.header("x-session-directory", directory).timeout(self.request_timeout);
        match (&self.username, &self.password) {
            (Some(u), p) => builder.basic_auth(u, p.clone()),
            _ => builder,
        }
    }

    async fn map_error_response(resp: reqwest::Response) -> AgentError {
        let status = resp.status().as_u16();
        let message = resp
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        AgentError::Http { status, message }
    }

    fn map_transport_error(err: reqwest::Error) -> AgentError {
        if err.is_timeout() {
            AgentError::Timeout
        } else {
            AgentError::Network(err)
        }
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn create_session(
        &self,
        directory: &str,
        title: Option<&str>,
    ) -> Result<SessionInfo, AgentError> {
        let body = CreateSessionRequest {
            directory: directory.to_string(),
            title: title.map(str::to_string),
        };
        let builder = self.authed(self.client.post(self.url("/session")), directory);
        let resp = builder.json(&body).send().await.map_err(Self::map_transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::map_error_response(resp).await);
        }
        Ok(resp.json::<SessionInfo>().await?)
    }

    async fn get_session(
        &self,
        directory: &str,
        session_id: &str,
    ) -> Result<Option<SessionInfo>, AgentError> {
        let builder = self.authed(
            self.client.get(self.url(&format!("/session/{session_id}"))),
            directory,
        );
        let resp = builder.send().await.map_err(Self::map_transport_error)?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::map_error_response(resp).await);
        }
        Ok(Some(resp.json::<SessionInfo>().await?))
    }

    async fn delete_session(&self, directory: &str, session_id: &str) -> Result<bool, AgentError> {
        let builder = self.authed(
            self.client.delete(self.url(&format!("/session/{session_id}"))),
            directory,
        );
        let resp = builder.send().await.map_err(Self::map_transport_error)?;
        if resp.status().as_u16() == 404 {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(Self::map_error_response(resp).await);
        }
        Ok(true)
    }

    async fn list_messages(
        &self,
        directory: &str,
        session_id: &str,
    ) -> Result<Vec<AgentMessage>, AgentError> {
        let builder = self.authed(
            self.client
                .get(self.url(&format!("/session/{session_id}/message"))),
            directory,
        );
        let resp = builder.send().await.map_err(Self::map_transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::map_error_response(resp).await);
        }
        Ok(resp.json::<Vec<AgentMessage>>().await?)
    }

    async fn prompt(&self, req: PromptRequest) -> Result<PromptResponse, AgentError> {
        let directory = req.directory.clone();
        let path = format!("/session/{}/message", req.session_id);
        let builder = self.authed(self.client.post(self.url(&path)), &directory);

        let body = serde_json::json!({
            "system": req.system,
            "model": { "providerID": req.model.provider_id, "modelID": req.model.model_id },
            "tools": req.tools,
            "parts": req.parts,
            "messageID": req.message_id,
        });
        let body = prune_nulls(body);

        let resp = builder.json(&body).send().await.map_err(Self::map_transport_error)?;
        if !resp.status().is_success() {
            return Err(Self::map_error_response(resp).await);
        }
        Ok(resp.json::<PromptResponse>().await?)
    }
}

fn prune_nulls(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.retain(|_, v| !v.is_null());
    }
    value
}
