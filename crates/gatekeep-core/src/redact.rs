// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Pattern-based secret scrubbing: text returned by the agent or
//! bound for logs passes through here before it leaves the process.

use std::sync::LazyLock;

use regex::Regex;

struct Pattern {
    regex: Regex,
    replacement: &'static str,
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        Pattern {
            regex: Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]{8,}").unwrap(),
            replacement: "Bearer [REDACTED]",
        },
        Pattern {
            regex: Regex::new(r"sk-[A-Za-z0-9]{16,}").unwrap(),
            replacement: "[REDACTED]",
        },
        Pattern {
            regex: Regex::new(r"(?i)(api[_-]?key|token|secret|password)\s*[:=]\s*\S+").unwrap(),
            replacement: "$1=[REDACTED]",
        },
    ]
});

/// Replaces every substring matching a known secret shape with a fixed
/// placeholder. Idempotent and safe to call on already-redacted text.
pub fn redact(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in PATTERNS.iter() {
        out = pattern.regex.replace_all(&out, pattern.replacement).into_owned();
    }
    out
}
