// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! File-backed session metadata and workspace directories.
//!
//! Layout under `dataDir`:
//! ```text
//! sessions/<botId>/<groupId>/<userId>/<sessionId>/
//!   meta.json
//!   workspace/
//! ```
//! Every write goes through a `.tmp`-then-rename so a crash mid-write
//! never leaves `meta.json` half-written; `rename` is atomic on POSIX.

mod error;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gatekeep_types::{ConversationKey, Identifier, SessionMeta};
use tokio::fs;

pub use error::SessionRepositoryError;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn load_session(
        &self,
        key: &ConversationKey,
        owner_id: &Identifier,
    ) -> Result<Option<SessionMeta>, SessionRepositoryError>;

    async fn create_session(&self, meta: &SessionMeta) -> Result<(), SessionRepositoryError>;

    async fn update_meta(&self, meta: &SessionMeta) -> Result<(), SessionRepositoryError>;

    /// Path to the session's on-disk workspace, creating it if absent.
    async fn ensure_workspace(
        &self,
        key: &ConversationKey,
        owner_id: &Identifier,
    ) -> Result<PathBuf, SessionRepositoryError>;
}

pub struct FileSessionRepository {
    data_dir: PathBuf,
}

impl FileSessionRepository {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn session_dir(&self, key: &ConversationKey, owner_id: &Identifier) -> PathBuf {
        self.data_dir
            .join("sessions")
            .join(key.bot_id.as_str())
            .join(key.group_id.as_str())
            .join(owner_id.as_str())
            .join(key.session_id.as_str())
    }

    fn meta_path(dir: &Path) -> PathBuf {
        dir.join("meta.json")
    }

    fn io_err(path: &Path, source: std::io::Error) -> SessionRepositoryError {
        SessionRepositoryError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Write `contents` to `path` crash-safely: write to a sibling
    /// `.tmp` file in the same directory, then rename over the target.
    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), SessionRepositoryError> {
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents)
            .await
            .map_err(|e| Self::io_err(&tmp_path, e))?;
        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| Self::io_err(path, e))?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for FileSessionRepository {
    async fn load_session(
        &self,
        key: &ConversationKey,
        owner_id: &Identifier,
    ) -> Result<Option<SessionMeta>, SessionRepositoryError> {
        let path = Self::meta_path(&self.session_dir(key, owner_id));
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }

    async fn create_session(&self, meta: &SessionMeta) -> Result<(), SessionRepositoryError> {
        let key = ConversationKey::new(
            meta.bot_id.clone(),
            meta.group_id.clone(),
            meta.session_id.clone(),
        );
        let dir = self.session_dir(&key, &meta.owner_id);
        fs::create_dir_all(dir.join("workspace"))
            .await
            .map_err(|e| Self::io_err(&dir, e))?;
        let contents = serde_json::to_vec_pretty(meta)?;
        Self::write_atomic(&Self::meta_path(&dir), &contents).await
    }

    async fn update_meta(&self, meta: &SessionMeta) -> Result<(), SessionRepositoryError> {
        let key = ConversationKey::new(
            meta.bot_id.clone(),
            meta.group_id.clone(),
            meta.session_id.clone(),
        );
        let dir = self.session_dir(&key, &meta.owner_id);
        let contents = serde_json::to_vec_pretty(meta)?;
        Self::write_atomic(&Self::meta_path(&dir), &contents).await
    }

    async fn ensure_workspace(
        &self,
        key: &ConversationKey,
        owner_id: &Identifier,
    ) -> Result<PathBuf, SessionRepositoryError> {
        let workspace = self.session_dir(key, owner_id).join("workspace");
        fs::create_dir_all(&workspace)
            .await
            .map_err(|e| Self::io_err(&workspace, e))?;
        Ok(workspace)
    }
}
