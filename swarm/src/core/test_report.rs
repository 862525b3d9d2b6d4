//! Parsing of test-runner output into counts and per-test failure details.
//!
//! Counts come from the final `==== N failed, M passed in Xs ====` line when
//! present, otherwise from loose `N passed` style tokens anywhere in the
//! output. The total is always recomputed from the four counts.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{FailedTest, TestStats};

static SUMMARY_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^=+\s*(.+?)\s+in\s+[\d.]+s(?:\s*\([^)]*\))?\s*=*\s*$")
        .expect("valid summary regex")
});

static COUNT_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s+(passed|failed|skipped|errors?)\b").expect("valid count regex")
});

static PREFIXED_FAILURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:FAILED|ERROR)\s+(\S+?)::(\S+)(?:\s+-\s+(.*))?$")
        .expect("valid failure regex")
});

static VERBOSE_FAILURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+?)::(\S+)\s+(?:FAILED|ERROR)\b").expect("valid verbose regex")
});

static ERROR_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_][\w.]*(?:Error|Exception))\b").expect("valid error type regex")
});

static SECTION_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_{3,}\s+(.+?)\s+_{3,}$").expect("valid section regex"));

static LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+?:(\d+):").expect("valid location regex"));

/// Counts and failures recovered from one test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub stats: TestStats,
    pub failed_tests: Vec<FailedTest>,
}

pub fn parse_test_output(output: &str) -> TestReport {
    let stats = summary_counts(output).unwrap_or_else(|| loose_counts(output));
    let failed_tests = failed_tests(output);
    TestReport {
        stats,
        failed_tests,
    }
}

#[derive(Default)]
struct Counts {
    passed: u32,
    failed: u32,
    skipped: u32,
    errors: u32,
}

impl Counts {
    fn record(&mut self, count: u32, word: &str) {
        match word.to_ascii_lowercase().as_str() {
            "passed" => self.passed = count,
            "failed" => self.failed = count,
            "skipped" => self.skipped = count,
            "error" | "errors" => self.errors = count,
            _ => {}
        }
    }

    fn into_stats(self) -> TestStats {
        TestStats::from_counts(self.passed, self.failed, self.skipped, self.errors)
    }
}

fn summary_counts(output: &str) -> Option<TestStats> {
    let summary = SUMMARY_LINE_RE
        .captures_iter(output)
        .filter_map(|caps| caps.get(1))
        .last()?;
    let mut counts = Counts::default();
    for caps in COUNT_TOKEN_RE.captures_iter(summary.as_str()) {
        if let Ok(count) = caps[1].parse::<u32>() {
            counts.record(count, &caps[2]);
        }
    }
    Some(counts.into_stats())
}

fn loose_counts(output: &str) -> TestStats {
    let mut counts = Counts::default();
    for line in output.lines() {
        let trimmed = line.trim_start();
        // Per-test lines can quote numbers in their messages.
        if trimmed.contains("::") || trimmed.starts_with("E ") {
            continue;
        }
        for caps in COUNT_TOKEN_RE.captures_iter(trimmed) {
            if let Ok(count) = caps[1].parse::<u32>() {
                counts.record(count, &caps[2]);
            }
        }
    }
    counts.into_stats()
}

struct Section {
    line: Option<u32>,
    error_type: Option<String>,
    traceback: String,
}

fn failed_tests(output: &str) -> Vec<FailedTest> {
    let sections = failure_sections(output);
    let mut tests: Vec<FailedTest> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for line in output.lines() {
        let line = line.trim_end();
        let (file, name, message) = if let Some(caps) = PREFIXED_FAILURE_RE.captures(line) {
            (
                caps[1].to_string(),
                caps[2].to_string(),
                caps.get(3).map(|m| m.as_str().trim().to_string()),
            )
        } else if let Some(caps) = VERBOSE_FAILURE_RE.captures(line) {
            (caps[1].to_string(), caps[2].to_string(), None)
        } else {
            continue;
        };

        let key = (file.clone(), name.clone());
        let slot = match index.get(&key).copied() {
            Some(slot) => slot,
            None => {
                tests.push(new_failed_test(file, name, &sections));
                index.insert(key, tests.len() - 1);
                tests.len() - 1
            }
        };

        if let Some(message) = message.filter(|m| !m.is_empty()) {
            let test = &mut tests[slot];
            if let Some(caps) = ERROR_TYPE_RE.captures(&message) {
                test.error_type = Some(caps[1].to_string());
            } else if test.error_type.is_none() && message.starts_with("assert") {
                test.error_type = Some("AssertionError".to_string());
            }
            test.error_message = Some(message);
        }
    }

    tests
}

fn new_failed_test(file: String, name: String, sections: &HashMap<String, Section>) -> FailedTest {
    // Section headers use `Class.test` where node ids use `Class::test`.
    let dotted = name.replace("::", ".");
    let section = sections.get(&dotted).or_else(|| {
        let short = dotted.rsplit('.').next().unwrap_or(&dotted);
        sections.get(short)
    });
    FailedTest {
        test_name: name,
        test_file: file,
        line: section.and_then(|s| s.line),
        error_type: section.and_then(|s| s.error_type.clone()),
        error_message: None,
        traceback: section
            .map(|s| s.traceback.clone())
            .filter(|tb| !tb.is_empty()),
    }
}

/// Split `--tb=short` failure blocks (`____ test_name ____`) by test name.
fn failure_sections(output: &str) -> HashMap<String, Section> {
    let mut sections = HashMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in output.lines() {
        let line = line.trim_end();
        if let Some(caps) = SECTION_HEADER_RE.captures(line) {
            if let Some((name, body)) = current.take() {
                sections.insert(name, build_section(&body));
            }
            current = Some((caps[1].to_string(), Vec::new()));
            continue;
        }
        if line.starts_with('=') {
            if let Some((name, body)) = current.take() {
                sections.insert(name, build_section(&body));
            }
            continue;
        }
        if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((name, body)) = current.take() {
        sections.insert(name, build_section(&body));
    }
    sections
}

fn build_section(body: &[&str]) -> Section {
    let line = body
        .iter()
        .find_map(|l| LOCATION_RE.captures(l))
        .and_then(|caps| caps[1].parse().ok());

    let mut error_type = None;
    for l in body.iter().filter(|l| l.starts_with('E')) {
        let detail = l[1..].trim_start();
        if let Some(caps) = ERROR_TYPE_RE.captures(detail) {
            error_type = Some(caps[1].to_string());
        } else if error_type.is_none() && detail.starts_with("assert") {
            error_type = Some("AssertionError".to_string());
        }
    }

    Section {
        line,
        error_type,
        traceback: body.join("\n").trim().to_string(),
    }
}
