// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Which tools the agent is allowed to call for a turn: a fixed
//! allowlist in a "build" context, a readonly subset in a "play"
//! context. The classification itself comes from outside this crate;
//! absent an injected classifier, every session is treated as "build".

use gatekeep_types::SessionMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPolicy {
    Build,
    Play,
}

const BUILD_TOOLS: &[&str] = &["read", "write", "edit", "bash", "glob", "grep"];
const PLAY_TOOLS: &[&str] = &["read", "glob", "grep"];

impl ToolPolicy {
    pub fn allowed_tools(self) -> Vec<String> {
        match self {
            ToolPolicy::Build => BUILD_TOOLS.iter().map(|s| s.to_string()).collect(),
            ToolPolicy::Play => PLAY_TOOLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub trait ToolPolicyClassifier: Send + Sync {
    fn classify(&self, meta: &SessionMeta) -> ToolPolicy;
}

/// Default classifier: every session is "build" until something external
/// says otherwise.
pub struct DefaultToolPolicyClassifier;

impl ToolPolicyClassifier for DefaultToolPolicyClassifier {
    fn classify(&self, _meta: &SessionMeta) -> ToolPolicy {
        ToolPolicy::Build
    }
}
