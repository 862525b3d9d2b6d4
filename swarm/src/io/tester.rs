//! Test-execution adapter.
//!
//! [`PytestRunner`] runs the configured test command against one test file
//! with verbose, short-traceback output and parses counts and failures from
//! the combined output. `success` reports whether the tool ran to completion;
//! whether the tests passed is derived from the parsed counts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use crate::core::test_report::parse_test_output;
use crate::core::types::TestResult;
use crate::io::process::{command_from_argv, run_command_with_timeout};
use crate::io::sandbox::{PathSandbox, has_source_extension};

pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Exit codes the test tool uses for internal and usage errors.
const CRASH_EXIT_CODES: [i32; 2] = [3, 4];

pub trait TestRunner {
    /// Run the tests in `path` (a test file or directory).
    fn run(&self, path: &Path) -> TestResult;

    /// Advisory check that `path` is, or contains, a test file.
    fn tests_exist(&self, path: &Path) -> bool;

    /// Label recorded in the experiment log.
    fn name(&self) -> &str {
        "tester"
    }
}

impl<T: TestRunner + ?Sized> TestRunner for &T {
    fn run(&self, path: &Path) -> TestResult {
        (**self).run(path)
    }

    fn tests_exist(&self, path: &Path) -> bool {
        (**self).tests_exist(path)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Runs `<command...> <path> -v --tb=short --no-header --no-summary`.
#[derive(Debug, Clone)]
pub struct PytestRunner {
    sandbox: PathSandbox,
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl PytestRunner {
    pub fn new(sandbox: PathSandbox, command: Vec<String>) -> Self {
        Self {
            sandbox,
            command,
            timeout: DEFAULT_TEST_TIMEOUT,
            output_limit_bytes: 1_000_000,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_limit(mut self, output_limit_bytes: usize) -> Self {
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    #[instrument(skip_all, fields(path = %path.display(), timeout_secs = timeout.as_secs()))]
    pub fn run_with(&self, path: &Path, timeout: Duration) -> TestResult {
        let resolved = match self.sandbox.validate(path) {
            Ok(resolved) => resolved,
            Err(err) => return TestResult::failed(err.to_string()),
        };
        if !resolved.exists() {
            return TestResult::failed(format!("test path not found: {}", resolved.display()));
        }

        let mut cmd = match command_from_argv(&self.command) {
            Ok(cmd) => cmd,
            Err(err) => return TestResult::failed(format!("test command: {err}")),
        };
        cmd.arg(&resolved)
            .args(["-v", "--tb=short", "--no-header", "--no-summary"])
            .current_dir(self.sandbox.root());

        let output = match run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "test tool failed to run");
                return TestResult::failed(format!("test execution failed: {err:#}"));
            }
        };
        let execution_time = output.elapsed.as_secs_f64();

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "test run timed out");
            let mut result =
                TestResult::failed(format!("test run timed out after {}s", timeout.as_secs()));
            result
                .metadata
                .insert("execution_time".to_string(), Value::from(execution_time));
            return result;
        }

        let combined = output.combined_text();
        let Some(return_code) = output.status.code() else {
            return TestResult::failed("test tool terminated by signal");
        };

        let report = parse_test_output(&combined);
        let mut result = if CRASH_EXIT_CODES.contains(&return_code) {
            warn!(return_code, "test tool crashed");
            let mut crashed = TestResult::failed(format!(
                "test tool exited with internal or usage error (exit {return_code})"
            ));
            crashed.stats = report.stats;
            crashed.failed_tests = report.failed_tests;
            crashed
        } else {
            TestResult::from_stats(report.stats, report.failed_tests)
        };

        let success_rate = result.success_rate();
        let metadata = &mut result.metadata;
        metadata.insert("filepath".to_string(), Value::from(resolved.display().to_string()));
        metadata.insert("execution_time".to_string(), Value::from(execution_time));
        metadata.insert("return_code".to_string(), Value::from(return_code));
        metadata.insert("success_rate".to_string(), Value::from(success_rate));

        info!(
            passed = result.stats.passed,
            failed = result.stats.failed,
            errors = result.stats.errors,
            "test run complete"
        );
        result
    }
}

impl TestRunner for PytestRunner {
    fn run(&self, path: &Path) -> TestResult {
        self.run_with(path, self.timeout)
    }

    fn tests_exist(&self, path: &Path) -> bool {
        let Ok(resolved) = self.sandbox.validate(path) else {
            return false;
        };
        if resolved.is_file() {
            return is_test_file(&resolved);
        }
        if resolved.is_dir() {
            return WalkDir::new(&resolved)
                .into_iter()
                .filter_map(Result::ok)
                .any(|entry| entry.file_type().is_file() && is_test_file(entry.path()));
        }
        false
    }

    fn name(&self) -> &str {
        self.command.first().map_or("tester", String::as_str)
    }
}

/// Test file naming convention: `test_*.py`, `*_test.py` or `tests.py`.
pub fn is_test_file(path: &Path) -> bool {
    if !has_source_extension(path) {
        return false;
    }
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    name.starts_with("test_") || name.ends_with("_test.py") || name == "tests.py"
}

/// Conventional test file name for a source file: `test_<name>`.
pub fn test_file_name_for(source: &Path) -> Option<PathBuf> {
    let name = source.file_name()?.to_str()?;
    Some(source.with_file_name(format!("test_{name}")))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn setup(script: &str) -> (tempfile::TempDir, PytestRunner) {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = PathSandbox::new(temp.path().join("work")).expect("sandbox");
        fs::write(sandbox.root().join("test_calc.py"), "def test_x():\n    pass\n").expect("write");
        let command = vec!["sh".to_string(), "-c".to_string(), script.to_string(), "pytest".to_string()];
        (temp, PytestRunner::new(sandbox, command))
    }

    #[test]
    fn invokes_tool_with_verbose_short_traceback_flags_in_root() {
        let (temp, runner) = setup(
            r#"{ pwd -P; printf '%s\n' "$@"; } > ../invocation.txt; echo '======= 1 passed in 0.01s ======='"#,
        );
        let root = runner.sandbox.root().to_path_buf();

        let result = runner.run(Path::new("test_calc.py"));
        assert!(result.success, "{:?}", result.error);

        let invocation = fs::read_to_string(temp.path().join("invocation.txt")).expect("invocation");
        let lines: Vec<&str> = invocation.lines().collect();
        let expected = vec![
            root.display().to_string(),
            root.join("test_calc.py").display().to_string(),
            "-v".to_string(),
            "--tb=short".to_string(),
            "--no-header".to_string(),
            "--no-summary".to_string(),
        ];
        assert_eq!(lines, expected);
    }

    #[test]
    fn passing_run_sets_both_flags() {
        let (_temp, runner) = setup(
            "echo 'test_calc.py::test_x PASSED [100%]'; echo '============ 1 passed in 0.01s ============'",
        );
        let result = runner.run(Path::new("test_calc.py"));
        assert!(result.success);
        assert!(result.all_tests_passed);
        assert_eq!(result.stats.total, 1);
        assert_eq!(result.metadata["success_rate"], Value::from(100.0));
    }

    #[test]
    fn failing_run_extracts_failures() {
        let script = "echo 'test_calc.py::test_x FAILED [ 50%]'; \
                      echo 'test_calc.py::test_y PASSED [100%]'; \
                      echo '___________ test_x ___________'; \
                      echo 'test_calc.py:2: in test_x'; \
                      echo '    assert 1 == 2'; \
                      echo 'E   assert 1 == 2'; \
                      echo '======= 1 failed, 1 passed in 0.02s ======='; \
                      exit 1";
        let (_temp, runner) = setup(script);
        let result = runner.run(Path::new("test_calc.py"));
        assert!(result.success);
        assert!(!result.all_tests_passed);
        assert_eq!(result.stats.failed, 1);
        assert_eq!(result.stats.passed, 1);
        assert_eq!(result.failed_tests.len(), 1);
        assert_eq!(result.failed_tests[0].test_name, "test_x");
        assert_eq!(result.metadata["return_code"], Value::from(1));
    }

    #[test]
    fn stderr_is_included_in_parsing() {
        let (_temp, runner) = setup("echo '=== 2 passed, 1 skipped in 0.10s ===' >&2");
        let result = runner.run(Path::new("test_calc.py"));
        assert_eq!(result.stats.passed, 2);
        assert_eq!(result.stats.skipped, 1);
        assert!(result.all_tests_passed);
    }

    #[test]
    fn internal_error_is_not_success() {
        let (_temp, runner) = setup("echo 'INTERNALERROR> boom'; exit 3");
        let result = runner.run(Path::new("test_calc.py"));
        assert!(!result.success);
        assert!(!result.all_tests_passed);
    }

    #[test]
    fn timeout_is_not_success() {
        let (_temp, runner) = setup("sleep 5");
        let result = runner.run_with(Path::new("test_calc.py"), Duration::from_millis(200));
        assert!(!result.success);
        assert!(!result.all_tests_passed);
        assert!(result.error.expect("error").contains("timed out"));
    }

    #[test]
    fn missing_path_is_not_success() {
        let (_temp, runner) = setup("exit 0");
        let result = runner.run(Path::new("test_missing.py"));
        assert!(!result.success);
        assert!(result.error.expect("error").contains("not found"));
    }

    #[test]
    fn tests_exist_follows_naming_convention() {
        let (_temp, runner) = setup("exit 0");
        let root = runner.sandbox.root().to_path_buf();
        fs::write(root.join("calc.py"), "").expect("write");
        fs::create_dir_all(root.join("empty")).expect("mkdir");
        fs::create_dir_all(root.join("suite/nested")).expect("mkdir");
        fs::write(root.join("suite/nested/calc_test.py"), "").expect("write");

        assert!(runner.tests_exist(Path::new("test_calc.py")));
        assert!(!runner.tests_exist(Path::new("calc.py")));
        assert!(!runner.tests_exist(Path::new("empty")));
        assert!(runner.tests_exist(Path::new("suite")));
        assert!(!runner.tests_exist(Path::new("../anything")));
    }

    #[test]
    fn naming_helpers() {
        assert!(is_test_file(Path::new("tests.py")));
        assert!(!is_test_file(Path::new("test_data.json")));
        assert_eq!(
            test_file_name_for(Path::new("/w/calc.py")),
            Some(PathBuf::from("/w/test_calc.py"))
        );
    }
}
