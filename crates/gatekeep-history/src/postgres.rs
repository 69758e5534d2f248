// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Durable `HistoryStore` backed by Postgres. Schema: `(id bigint pk,
//! bot_account_id, user_id, group_id, role, content, created_at, meta
//! jsonb)` with an index on `(bot_account_id, user_id, id)`. The reader
//! pulls the most recent N rows by `id desc`, reverses them back to
//! oldest-first, then applies the same head-trim the in-memory store
//! uses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatekeep_types::{HistoryEntry, HistoryKey, HistoryRole, ReadOptions};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::{trim_to_budget, HistoryError, HistoryStore};

/// Rows are pulled this many at a time before head-trimming by bytes;
/// generous enough that `max_bytes` budgets in the low tens of KB are
/// satisfied without a second round trip in the common case.
const FETCH_WINDOW: i64 = 200;

pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    pub async fn connect(database_url: &str) -> Result<Self, HistoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the table and its lookup index if they don't already
    /// exist. Called once at startup; there is no separate migration
    /// runner for a schema this small.
    pub async fn ensure_schema(&self) -> Result<(), HistoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history_entries (
                id              BIGSERIAL PRIMARY KEY,
                bot_account_id  TEXT NOT NULL,
                user_id         TEXT NOT NULL,
                group_id        TEXT,
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                created_at      TIMESTAMPTZ NOT NULL,
                meta            JSONB NOT NULL DEFAULT '{}'::jsonb
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS history_entries_lookup_idx
                ON history_entries (bot_account_id, user_id, id)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_role(role: HistoryRole) -> &'static str {
        match role {
            HistoryRole::User => "user",
            HistoryRole::Assistant => "assistant",
            HistoryRole::System => "system",
        }
    }

    fn parse_role(raw: &str) -> HistoryRole {
        match raw {
            "assistant" => HistoryRole::Assistant,
            "system" => HistoryRole::System,
            _ => HistoryRole::User,
        }
    }
}

/// Shape of the `meta` jsonb column. Both fields default the same way
/// `HistoryEntry`'s own serde defaults do, so rows written before a field
/// existed still read back sensibly.
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RowMeta {
    #[serde(default = "default_true")]
    include_in_context: bool,
    #[serde(default)]
    trace: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for RowMeta {
    fn default() -> Self {
        Self {
            include_in_context: true,
            trace: None,
        }
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn read_history(
        &self,
        key: &HistoryKey,
        opts: ReadOptions,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let limit = opts.max_entries.map(|n| n as i64).unwrap_or(FETCH_WINDOW);
        let rows = sqlx::query(
            r#"
            SELECT role, content, created_at, group_id, meta
            FROM history_entries
            WHERE bot_account_id = $1 AND user_id = $2
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(&key.bot_account_id)
        .bind(&key.user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut entries: Vec<HistoryEntry> = rows
            .into_iter()
            .map(|row| {
                let role: String = row.get("role");
                let content: String = row.get("content");
                let created_at: DateTime<Utc> = row.get("created_at");
                let group_id: Option<String> = row.get("group_id");
                let meta: serde_json::Value = row.get("meta");
                let meta: RowMeta = serde_json::from_value(meta).unwrap_or_default();
                HistoryEntry {
                    role: Self::parse_role(&role),
                    content,
                    created_at,
                    group_id,
                    session_id: None,
                    include_in_context: meta.include_in_context,
                    trace: meta.trace,
                }
            })
            .collect();
        entries.reverse();

        Ok(trim_to_budget(entries, opts))
    }

    async fn append_history(
        &self,
        key: &HistoryKey,
        entry: HistoryEntry,
    ) -> Result<(), HistoryError> {
        sqlx::query(
            r#"
            INSERT INTO history_entries
                (bot_account_id, user_id, group_id, role, content, created_at, meta)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&key.bot_account_id)
        .bind(&key.user_id)
        .bind(&entry.group_id)
        .bind(Self::row_role(entry.role))
        .bind(&entry.content)
        .bind(entry.created_at)
        .bind(serde_json::json!({ "includeInContext": entry.include_in_context, "trace": entry.trace }))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
