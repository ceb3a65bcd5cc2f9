// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secret redaction for exported checkpoints.
//!
//! Scrollback routinely contains pasted credentials. Before anything
//! leaves the machine as an archive, known credential shapes are replaced
//! with a fixed sentinel. The scanner never surfaces the matched values,
//! only counts.

use regex::Regex;

/// What redacted matches are replaced with.
pub const REDACTED: &str = "[REDACTED]";

/// Compiled credential patterns.
pub struct Redactor {
    patterns: Vec<(&'static str, Regex)>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Redactor {
    pub fn new() -> Self {
        // Compile-checked in tests; an invalid pattern is a programming
        // error caught there, so failures degrade to "pattern skipped".
        let sources: &[(&str, &str)] = &[
            ("anthropic_api_key", r"sk-ant-[A-Za-z0-9_-]{8,}"),
            ("openai_api_key", r"sk-[A-Za-z0-9]{20,}"),
            ("aws_access_key_id", r"\bAKIA[0-9A-Z]{16}\b"),
            ("google_api_key", r"\bAIza[0-9A-Za-z_-]{35}\b"),
            ("github_token", r"\bgh[pousr]_[A-Za-z0-9]{36,}\b"),
            ("slack_token", r"\bxox[baprs]-[A-Za-z0-9-]{10,}\b"),
            ("bearer_token", r"(?i)bearer\s+[A-Za-z0-9._~+/=-]{16,}"),
            (
                "assigned_secret",
                r#"(?i)\b(api[_-]?key|secret|token|password)\s*[=:]\s*["']?[A-Za-z0-9._~+/-]{12,}["']?"#,
            ),
        ];
        let patterns = sources
            .iter()
            .filter_map(|(name, src)| Regex::new(src).ok().map(|re| (*name, re)))
            .collect();
        Self { patterns }
    }

    /// Replace every credential match with the sentinel; returns the
    /// scrubbed text and the number of replacements.
    pub fn redact(&self, text: &str) -> (String, usize) {
        let mut out = text.to_owned();
        let mut count = 0;
        for (_, re) in &self.patterns {
            let matches = re.find_iter(&out).count();
            if matches > 0 {
                count += matches;
                out = re.replace_all(&out, REDACTED).into_owned();
            }
        }
        (out, count)
    }

    /// Names of patterns that match the text, without exposing matches.
    pub fn scan(&self, text: &str) -> Vec<&'static str> {
        self.patterns
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(name, _)| *name)
            .collect()
    }
}

#[cfg(test)]
#[path = "redact_tests.rs"]
mod tests;
