// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Gate loop and session-processor orchestration: the part
//! of the session-processing core that actually drives a turn, built on
//! top of the buffer, history, session, and agent crates.

mod adapter;
mod error;
mod gate_loop;
mod processor;
mod redact;
mod tool_policy;

pub use adapter::{Adapter, LoggingAdapter, RecordingAdapter, ReplyContext};
pub use error::ProcessorError;
pub use gate_loop::{run_gate_loop, GateLoopOutcome, OnBatchOutcome};
pub use processor::{ProcessorConfig, SessionProcessor};
pub use redact::redact;
pub use tool_policy::{DefaultToolPolicyClassifier, ToolPolicy, ToolPolicyClassifier};
