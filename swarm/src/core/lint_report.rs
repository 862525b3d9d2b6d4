//! Parsing of static-analyzer output into typed issues and a quality score.
//!
//! The analyzer is asked for a JSON message list. When that list cannot be
//! decoded the parser still recovers a score from a trailing
//! `rated at <score>/10` line, so partial output never fails the whole run.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::core::types::{Issue, IssueCategory};

pub const MAX_SCORE: f64 = 10.0;

static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"rated at\s+(-?\d+(?:\.\d+)?)\s*/\s*10").expect("valid score regex")
});

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    column: Option<u32>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    symbol: String,
    #[serde(rename = "message-id", default)]
    message_id: Option<String>,
}

/// Issues and score recovered from one analyzer run.
#[derive(Debug, Clone, PartialEq)]
pub struct LintReport {
    pub score: f64,
    pub issues: Vec<Issue>,
    /// Whether the JSON message list was decoded.
    pub structured: bool,
}

/// Parse analyzer stdout (and optionally stderr, for the score line).
pub fn parse_lint_output(stdout: &str, stderr: &str) -> LintReport {
    let (issues, structured) = match decode_messages(stdout) {
        Some(messages) => (to_issues(messages), true),
        None => {
            debug!("analyzer output was not a JSON message list, using score fallback");
            (Vec::new(), false)
        }
    };
    let score = extract_score(stdout)
        .or_else(|| extract_score(stderr))
        .unwrap_or(0.0);
    LintReport {
        score,
        issues,
        structured,
    }
}

/// Extract the last `rated at X/10` score, clamped to `0.0..=10.0`.
pub fn extract_score(text: &str) -> Option<f64> {
    SCORE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .last()
        .map(|score| score.clamp(0.0, MAX_SCORE))
}

fn decode_messages(stdout: &str) -> Option<Vec<RawMessage>> {
    let trimmed = stdout.trim();
    if let Ok(messages) = serde_json::from_str::<Vec<RawMessage>>(trimmed) {
        return Some(messages);
    }
    // The score line may trail the JSON array; retry on the bracketed span.
    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<RawMessage>>(&trimmed[start..=end]).ok()
}

fn to_issues(messages: Vec<RawMessage>) -> Vec<Issue> {
    messages
        .into_iter()
        .filter_map(|raw| {
            let Some(category) = IssueCategory::parse(&raw.kind) else {
                debug!(kind = %raw.kind, "skipping message with unknown category");
                return None;
            };
            Some(Issue::new(
                category,
                raw.line.unwrap_or(0),
                raw.column.unwrap_or(0),
                raw.message,
                raw.symbol,
                raw.message_id.filter(|id| !id.is_empty()),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {"type": "convention", "module": "calc", "obj": "", "line": 1, "column": 0,
         "path": "calc.py", "symbol": "missing-module-docstring",
         "message": "Missing module docstring", "message-id": "C0114"},
        {"type": "error", "module": "calc", "obj": "add", "line": 7, "column": 11,
         "path": "calc.py", "symbol": "undefined-variable",
         "message": "Undefined variable 'c'", "message-id": "E0602"}
    ]"#;

    #[test]
    fn parses_json_messages_into_issues() {
        let report = parse_lint_output(SAMPLE, "");
        assert!(report.structured);
        assert_eq!(report.issues.len(), 2);
        let error = &report.issues[1];
        assert_eq!(error.category, IssueCategory::Error);
        assert_eq!(error.severity, 8);
        assert_eq!((error.line, error.column), (7, 11));
        assert_eq!(error.symbol, "undefined-variable");
        assert_eq!(error.rule_id.as_deref(), Some("E0602"));
    }

    #[test]
    fn missing_score_defaults_to_zero() {
        let report = parse_lint_output(SAMPLE, "");
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn json_followed_by_score_line() {
        let stdout = format!(
            "{SAMPLE}\n------------------------------------\nYour code has been rated at 7.50/10\n"
        );
        let report = parse_lint_output(&stdout, "");
        assert!(report.structured);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.score, 7.5);
    }

    #[test]
    fn falls_back_to_score_from_free_text() {
        let stdout = "************* Module calc\ncalc.py:1:0: C0114\n\nYour code has been rated at 8.33/10 (previous run: 6.00/10, +2.33)\n";
        let report = parse_lint_output(stdout, "");
        assert!(!report.structured);
        assert!(report.issues.is_empty());
        assert_eq!(report.score, 8.33);
    }

    #[test]
    fn score_is_clamped_to_bounds() {
        assert_eq!(extract_score("rated at -3.20/10"), Some(0.0));
        assert_eq!(extract_score("rated at 10.00/10"), Some(10.0));
        assert_eq!(extract_score("no score here"), None);
    }

    #[test]
    fn score_can_come_from_stderr() {
        let report = parse_lint_output("[]", "Your code has been rated at 9.00/10");
        assert!(report.structured);
        assert_eq!(report.score, 9.0);
    }

    #[test]
    fn unknown_categories_are_skipped() {
        let stdout = r#"[{"type": "information", "line": 1, "column": 0, "message": "m", "symbol": "s"}]"#;
        let report = parse_lint_output(stdout, "");
        assert!(report.structured);
        assert!(report.issues.is_empty());
    }
}
