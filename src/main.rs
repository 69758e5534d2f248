// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Entry point for the session-processing worker: loads
//! configuration, wires the Redis/Postgres/agent-HTTP backends into a
//! `SessionProcessor`, and runs the durable-queue consumer until asked
//! to stop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gatekeep_agent::HttpAgentClient;
use gatekeep_buffer::{RedisActivityIndex, RedisBufferStore};
use gatekeep_config::Config;
use gatekeep_core::{LoggingAdapter, ProcessorConfig, SessionProcessor};
use gatekeep_history::PostgresHistoryStore;
use gatekeep_session::FileSessionRepository;
use gatekeep_worker::{RedisStreamQueue, Worker, WorkerConfig};
use tokio::sync::watch;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "worker exited with a fatal error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    let redis_client = redis::Client::open(config.redis_url.as_str())
        .context("parsing REDIS_URL")?;
    let conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .context("connecting to redis")?;

    let history = PostgresHistoryStore::connect(&config.database_url)
        .await
        .context("connecting to postgres")?;
    history.ensure_schema().await.context("ensuring history schema")?;

    let buffer = Arc::new(RedisBufferStore::new(conn.clone()));
    let activity = Arc::new(RedisActivityIndex::new(conn.clone()));
    let sessions = Arc::new(FileSessionRepository::new(config.data_dir.clone()));
    let agent = Arc::new(HttpAgentClient::new(
        config.opencode_server_url.clone(),
        config.opencode_server_username.clone(),
        config.opencode_server_password.clone(),
        config.opencode_server_timeout,
    ));
    let adapter = Arc::new(LoggingAdapter);

    let processor = Arc::new(SessionProcessor::new(
        buffer,
        activity,
        Arc::new(history),
        sessions,
        agent,
        adapter,
        ProcessorConfig {
            agent_system_prompt: default_system_prompt(),
            model_selection: config.model_selection.clone(),
            prompt_max_bytes: config.prompt_max_bytes,
            gate_ttl: config.gate_ttl,
            heartbeat_interval: config.heartbeat_interval,
        },
    ));

    let consumer_name = format!("gatekeep-worker-{}", uuid::Uuid::new_v4());
    let queue = Arc::new(RedisStreamQueue::new(conn, "gatekeep-workers", consumer_name));
    queue.ensure_group().await.context("ensuring consumer group")?;

    let worker = Worker::new(
        queue,
        processor,
        WorkerConfig {
            concurrency: config.worker_concurrency,
            base_backoff: Duration::from_secs(1),
            ..WorkerConfig::default()
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
    Ok(())
}

fn default_system_prompt() -> String {
    "You are a software engineering assistant operating on behalf of a chat user. \
     Be concise and make concrete progress on their request."
        .to_string()
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
