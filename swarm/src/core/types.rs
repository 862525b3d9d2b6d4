//! Structured results shared by the tool layer and the repair loop.
//!
//! Every tool boundary reports through one of these value types instead of
//! returning errors for expected failures. They carry no I/O handles and are
//! produced fresh for each invocation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form, deterministically ordered metadata attached to a result.
pub type Metadata = BTreeMap<String, Value>;

/// Lint message category, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueCategory {
    Fatal,
    Error,
    Warning,
    Refactor,
    Convention,
}

impl IssueCategory {
    pub const ALL: [IssueCategory; 5] = [
        IssueCategory::Fatal,
        IssueCategory::Error,
        IssueCategory::Warning,
        IssueCategory::Refactor,
        IssueCategory::Convention,
    ];

    /// Numeric severity used for ranking issues (higher is worse).
    pub fn severity(self) -> u8 {
        match self {
            IssueCategory::Fatal => 10,
            IssueCategory::Error => 8,
            IssueCategory::Warning => 5,
            IssueCategory::Refactor => 3,
            IssueCategory::Convention => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IssueCategory::Fatal => "fatal",
            IssueCategory::Error => "error",
            IssueCategory::Warning => "warning",
            IssueCategory::Refactor => "refactor",
            IssueCategory::Convention => "convention",
        }
    }

    /// Parse a category name as emitted by the analyzer (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        IssueCategory::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(raw))
    }
}

/// A single finding reported by the static analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub line: u32,
    pub column: u32,
    pub message: String,
    /// Short rule name, e.g. `unused-import`.
    pub symbol: String,
    /// Rule identifier, e.g. `W0611`.
    pub rule_id: Option<String>,
    pub severity: u8,
}

impl Issue {
    /// Build an issue; `severity` is always derived from `category`.
    pub fn new(
        category: IssueCategory,
        line: u32,
        column: u32,
        message: impl Into<String>,
        symbol: impl Into<String>,
        rule_id: Option<String>,
    ) -> Self {
        Self {
            category,
            line,
            column,
            message: message.into(),
            symbol: symbol.into(),
            rule_id,
            severity: category.severity(),
        }
    }
}

/// Normalized output of one static-analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub success: bool,
    /// Quality score in `0.0..=10.0`; `0.0` when unavailable.
    pub score: f64,
    pub issues: Vec<Issue>,
    pub error: Option<String>,
    pub metadata: Metadata,
}

impl AnalysisResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            score: 0.0,
            issues: Vec::new(),
            error: Some(error.into()),
            metadata: Metadata::new(),
        }
    }

    pub fn issues_by_category(&self) -> BTreeMap<IssueCategory, Vec<&Issue>> {
        let mut grouped: BTreeMap<IssueCategory, Vec<&Issue>> = BTreeMap::new();
        for issue in &self.issues {
            grouped.entry(issue.category).or_default().push(issue);
        }
        grouped
    }

    /// Issue counts keyed by category name; every category is present.
    pub fn count_by_category(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = IssueCategory::ALL
            .into_iter()
            .map(|category| (category.as_str().to_string(), 0))
            .collect();
        for issue in &self.issues {
            *counts.entry(issue.category.as_str().to_string()).or_default() += 1;
        }
        counts
    }

    pub fn is_improved(&self, other: &AnalysisResult) -> bool {
        self.score > other.score
    }
}

/// Aggregate counts parsed from a test run. `total` is always the sum of the
/// other four fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStats {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub errors: u32,
}

impl TestStats {
    pub fn from_counts(passed: u32, failed: u32, skipped: u32, errors: u32) -> Self {
        Self {
            total: passed + failed + skipped + errors,
            passed,
            failed,
            skipped,
            errors,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }

    /// Percentage of passed tests (`0.0` when nothing ran).
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.passed) / f64::from(self.total) * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTest {
    pub test_name: String,
    pub test_file: String,
    pub line: Option<u32>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub traceback: Option<String>,
}

/// Normalized output of one test run.
///
/// `success` reports whether the test tool itself ran to completion;
/// `all_tests_passed` is derived from the parsed counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub success: bool,
    pub all_tests_passed: bool,
    pub stats: TestStats,
    pub failed_tests: Vec<FailedTest>,
    pub error: Option<String>,
    pub metadata: Metadata,
}

impl TestResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            all_tests_passed: false,
            stats: TestStats::default(),
            failed_tests: Vec::new(),
            error: Some(error.into()),
            metadata: Metadata::new(),
        }
    }

    pub fn from_stats(stats: TestStats, failed_tests: Vec<FailedTest>) -> Self {
        Self {
            success: true,
            all_tests_passed: stats.all_passed(),
            stats,
            failed_tests,
            error: None,
            metadata: Metadata::new(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        self.stats.success_rate()
    }
}

/// Findings gathered by one auditing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub lint: AnalysisResult,
    /// `None` when no test file exists for the target.
    pub tests: Option<TestResult>,
}

/// Outcome of a sandboxed file operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOperationResult {
    pub success: bool,
    pub content: Option<String>,
    pub path: PathBuf,
    pub error: Option<String>,
    pub metadata: Metadata,
}

impl FileOperationResult {
    pub fn ok(path: impl Into<PathBuf>) -> Self {
        Self {
            success: true,
            content: None,
            path: path.into(),
            error: None,
            metadata: Metadata::new(),
        }
    }

    pub fn failed(path: &Path, error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            path: path.to_path_buf(),
            error: Some(error.into()),
            metadata: Metadata::new(),
        }
    }

    pub fn with_content(mut self, content: String) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Backup location recorded by `write`, `backup` or `delete`, if any.
    pub fn backup_path(&self) -> Option<PathBuf> {
        self.metadata
            .get("backup_path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
    }
}
