// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Identifier validation: the "safe path segment" alphabet shared by every
//! on-disk path, Redis key, and queue payload field in this crate family.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum length of a single identifier segment.
pub const MAX_IDENTIFIER_LEN: usize = 128;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier must not be empty")]
    Empty,
    #[error("identifier exceeds {MAX_IDENTIFIER_LEN} bytes")]
    TooLong,
    #[error("identifier must not start with '.'")]
    LeadingDot,
    #[error("identifier contains a path separator or '..'")]
    PathTraversal,
    #[error("identifier contains a character outside [A-Za-z0-9._-]: {0:?}")]
    InvalidChar(char),
}

/// A validated "safe path segment": non-empty, no path separators, no `..`,
/// no leading `.`, characters drawn from `[A-Za-z0-9._-]`, length bounded.
///
/// Every `botId`, `groupId`, `sessionId`, and `userId` that crosses an
/// external interface (queue payload, Redis key, filesystem path) is one
/// of these. Construct via [`Identifier::parse`]; there is no public
/// constructor that skips validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdentifierError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if raw.len() > MAX_IDENTIFIER_LEN {
            return Err(IdentifierError::TooLong);
        }
        if raw.starts_with('.') {
            return Err(IdentifierError::LeadingDot);
        }
        if raw.contains('/') || raw.contains('\\') || raw.contains("..") {
            return Err(IdentifierError::PathTraversal);
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(IdentifierError::InvalidChar(c));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identifier::parse(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
