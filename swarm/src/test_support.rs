//! Test-only helpers: a throwaway sandbox and scripted tool fakes.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::core::types::{AnalysisResult, Metadata, TestResult};
use crate::io::analyzer::Analyzer;
use crate::io::discovery::Target;
use crate::io::experiment_log::{ExperimentLog, LogEntry, read_entries};
use crate::io::file_store::FileStore;
use crate::io::sandbox::PathSandbox;
use crate::io::tester::{TestRunner, is_test_file};
use crate::io::transformer::{TransformRequest, Transformer};

/// Sandbox rooted at `<tempdir>/work`, with the experiment log kept outside
/// the sandbox at `<tempdir>/logs/experiment_data.json`.
pub struct TempSandbox {
    temp: tempfile::TempDir,
    sandbox: PathSandbox,
}

impl TempSandbox {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = PathSandbox::new(temp.path().join("work")).expect("sandbox");
        Self { temp, sandbox }
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn outside(&self) -> &Path {
        self.temp.path()
    }

    pub fn sandbox(&self) -> PathSandbox {
        self.sandbox.clone()
    }

    pub fn store(&self) -> FileStore {
        FileStore::new(self.sandbox())
    }

    pub fn log_path(&self) -> PathBuf {
        self.temp.path().join("logs").join("experiment_data.json")
    }

    pub fn log(&self) -> ExperimentLog {
        ExperimentLog::new(self.log_path())
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        read_entries(&self.log_path()).expect("read experiment log")
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.root().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.root().join(name)).expect("read file")
    }

    /// Create `name` with `code`, plus a `test_<name>` file when `with_tests`.
    pub fn target(&self, name: &str, code: &str, with_tests: bool) -> Target {
        let source = self.write(name, code);
        let test_file =
            with_tests.then(|| self.write(&format!("test_{name}"), "def test_placeholder():\n    pass\n"));
        Target { source, test_file }
    }
}

impl Default for TempSandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Analyzer returning queued results, then repeating the last one.
pub struct ScriptedAnalyzer {
    results: RefCell<VecDeque<AnalysisResult>>,
    last: RefCell<AnalysisResult>,
    calls: Cell<usize>,
}

impl ScriptedAnalyzer {
    pub fn new(results: Vec<AnalysisResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            last: RefCell::new(AnalysisResult::failed("no scripted analysis")),
            calls: Cell::new(0),
        }
    }

    /// Always report a successful, issue-free analysis with `score`.
    pub fn scoring(score: f64) -> Self {
        Self::new(vec![analysis(score)])
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Analyzer for ScriptedAnalyzer {
    fn analyze(&self, _path: &Path) -> AnalysisResult {
        self.calls.set(self.calls.get() + 1);
        if let Some(next) = self.results.borrow_mut().pop_front() {
            *self.last.borrow_mut() = next;
        }
        self.last.borrow().clone()
    }
}

pub fn analysis(score: f64) -> AnalysisResult {
    AnalysisResult {
        success: true,
        score,
        issues: Vec::new(),
        error: None,
        metadata: Metadata::new(),
    }
}

/// Test runner returning queued results, then repeating the last one.
/// `tests_exist` checks the real filesystem and naming convention.
pub struct ScriptedTestRunner {
    results: RefCell<VecDeque<TestResult>>,
    last: RefCell<TestResult>,
    calls: Cell<usize>,
}

impl ScriptedTestRunner {
    pub fn new(results: Vec<TestResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            last: RefCell::new(TestResult::failed("no scripted test result")),
            calls: Cell::new(0),
        }
    }

    pub fn repeating(result: TestResult) -> Self {
        Self::new(vec![result])
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, _path: &Path) -> TestResult {
        self.calls.set(self.calls.get() + 1);
        if let Some(next) = self.results.borrow_mut().pop_front() {
            *self.last.borrow_mut() = next;
        }
        self.last.borrow().clone()
    }

    fn tests_exist(&self, path: &Path) -> bool {
        path.is_file() && is_test_file(path)
    }
}

/// Transformer returning queued responses, then failing.
pub struct ScriptedTransformer {
    responses: RefCell<VecDeque<Result<String>>>,
    requests: RefCell<Vec<TransformRequest>>,
}

impl ScriptedTransformer {
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn requests(&self) -> Vec<TransformRequest> {
        self.requests.borrow().clone()
    }
}

impl Transformer for ScriptedTransformer {
    fn transform(&self, request: &TransformRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted transformer unavailable")))
    }
}
