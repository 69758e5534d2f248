// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Environment-variable configuration for the session-processing core.
//!
//! This is a headless worker service: unlike an interactive agent it has no
//! YAML config-file layer, only its process environment.
//! Loading is eager and fail-fast — [`Config::load`] returns an error on the
//! first malformed or missing-but-required variable, and the caller is
//! expected to abort the process with a non-zero exit code on that error.

use std::time::Duration;

use clap::Parser;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("{0} is not a valid URL: {1}")]
    InvalidUrl(&'static str, String),
    #[error("{0} must be a positive integer, got {1:?}")]
    InvalidNumber(&'static str, String),
}

/// Raw CLI/env surface. Every field doubles as an environment variable via
/// clap's `env` derive feature, matching the rest of this workspace's CLI
/// conventions.
#[derive(Debug, Parser)]
#[command(name = "gatekeep-worker", about = "Session-processing worker")]
struct RawArgs {
    #[arg(long, env = "DATA_DIR")]
    data_dir: String,

    #[arg(long, env = "REDIS_URL")]
    redis_url: String,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "OPENCODE_SERVER_URL")]
    opencode_server_url: String,
    #[arg(long, env = "OPENCODE_SERVER_USERNAME")]
    opencode_server_username: Option<String>,
    #[arg(long, env = "OPENCODE_SERVER_PASSWORD")]
    opencode_server_password: Option<String>,
    #[arg(long, env = "OPENCODE_SERVER_TIMEOUT_MS", default_value = "30000")]
    opencode_server_timeout_ms: String,
    #[arg(long, env = "OPENCODE_SERVER_WAIT_TIMEOUT_MS", default_value = "60000")]
    opencode_server_wait_timeout_ms: String,

    #[arg(long, env = "OPENCODE_PROMPT_MAX_BYTES", default_value = "200000")]
    opencode_prompt_max_bytes: String,

    #[arg(long, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: Option<String>,
    #[arg(long, env = "OPENCODE_MODELS")]
    opencode_models: Option<String>,

    #[arg(long, env = "GATE_TTL_SECS", default_value = "60")]
    gate_ttl_secs: String,

    #[arg(long, env = "WORKER_CONCURRENCY", default_value = "4")]
    worker_concurrency: String,
}

/// How the processor should address the model for a turn, chosen once at
/// config load from the presence/absence of the external-provider env trio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    /// `OPENAI_BASE_URL`/`OPENAI_API_KEY`/`OPENCODE_MODELS` are all set.
    ExternalProvider { allowed_models: Vec<String> },
    /// Fall back to the bundled opencode default model.
    Default,
}

impl ModelSelection {
    /// Resolve the model id to request for a conversation, given the
    /// group's override (if any).
    pub fn resolve(&self, group_override: Option<&str>) -> (&str, &str) {
        match self {
            ModelSelection::ExternalProvider { allowed_models } => {
                let model = group_override
                    .filter(|m| allowed_models.iter().any(|a| a == m))
                    .or_else(|| allowed_models.first().map(|s| s.as_str()))
                    .unwrap_or("");
                ("litellm", model)
            }
            ModelSelection::Default => ("opencode", "glm-4.7-free"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    pub redis_url: String,
    pub database_url: String,

    pub opencode_server_url: String,
    pub opencode_server_username: Option<String>,
    pub opencode_server_password: Option<String>,
    pub opencode_server_timeout: Duration,
    pub opencode_server_wait_timeout: Duration,

    pub prompt_max_bytes: usize,
    pub model_selection: ModelSelection,

    pub gate_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub worker_concurrency: usize,
}

fn parse_positive_usize(name: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.parse::<usize>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::InvalidNumber(name, raw.to_string()))
}

fn validate_url(name: &'static str, raw: &str) -> Result<(), ConfigError> {
    url::Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(name, e.to_string()))?;
    Ok(())
}

/// `max(1s, min(30s, ttl/2))`.
fn heartbeat_for(ttl: Duration) -> Duration {
    let half = ttl / 2;
    half.clamp(Duration::from_secs(1), Duration::from_secs(30))
}

impl Config {
    /// Parse CLI args + environment, then validate. Fails closed: any
    /// malformed value is a config error, never a default.
    pub fn load() -> Result<Self, ConfigError> {
        let raw = RawArgs::parse();
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawArgs) -> Result<Self, ConfigError> {
        validate_url("REDIS_URL", &raw.redis_url)?;
        validate_url("DATABASE_URL", &raw.database_url)?;
        validate_url("OPENCODE_SERVER_URL", &raw.opencode_server_url)?;

        let opencode_server_timeout_ms =
            parse_positive_usize("OPENCODE_SERVER_TIMEOUT_MS", &raw.opencode_server_timeout_ms)?;
        let opencode_server_wait_timeout_ms = parse_positive_usize(
            "OPENCODE_SERVER_WAIT_TIMEOUT_MS",
            &raw.opencode_server_wait_timeout_ms,
        )?;
        let prompt_max_bytes =
            parse_positive_usize("OPENCODE_PROMPT_MAX_BYTES", &raw.opencode_prompt_max_bytes)?;
        let gate_ttl_secs = parse_positive_usize("GATE_TTL_SECS", &raw.gate_ttl_secs)?;
        let worker_concurrency =
            parse_positive_usize("WORKER_CONCURRENCY", &raw.worker_concurrency)?;

        let model_selection = match (
            raw.openai_base_url.as_deref(),
            raw.openai_api_key.as_deref(),
            raw.opencode_models.as_deref(),
        ) {
            (Some(base), Some(key), Some(models)) if !base.is_empty() && !key.is_empty() => {
                let allowed_models: Vec<String> = models
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if allowed_models.is_empty() {
                    ModelSelection::Default
                } else {
                    ModelSelection::ExternalProvider { allowed_models }
                }
            }
            _ => ModelSelection::Default,
        };

        let gate_ttl = Duration::from_secs(gate_ttl_secs as u64);

        Ok(Config {
            data_dir: raw.data_dir,
            redis_url: raw.redis_url,
            database_url: raw.database_url,
            opencode_server_url: raw.opencode_server_url,
            opencode_server_username: raw.opencode_server_username,
            opencode_server_password: raw.opencode_server_password,
            opencode_server_timeout: Duration::from_millis(opencode_server_timeout_ms as u64),
            opencode_server_wait_timeout: Duration::from_millis(
                opencode_server_wait_timeout_ms as u64,
            ),
            prompt_max_bytes,
            model_selection,
            gate_ttl,
            heartbeat_interval: heartbeat_for(gate_ttl),
            worker_concurrency,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
