//! Static-analysis adapter.
//!
//! The [`Analyzer`] trait decouples the repair loop from the external lint
//! tool. [`PylintAnalyzer`] runs the configured command as a child process
//! rooted at the sandbox and normalizes its JSON output; tests use scripted
//! analyzers that return predetermined results.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::lint_report::parse_lint_output;
use crate::core::types::AnalysisResult;
use crate::io::process::{command_from_argv, run_command_with_timeout};
use crate::io::sandbox::{PathSandbox, has_source_extension};

pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit status bit the lint tool sets for usage errors (bad flags, bad rcfile).
const USAGE_ERROR_BIT: i32 = 32;

/// Abstraction over static-analysis backends.
pub trait Analyzer {
    /// Analyze one source file. Expected failures are reported in the result.
    fn analyze(&self, path: &Path) -> AnalysisResult;

    /// Label recorded in the experiment log.
    fn name(&self) -> &str {
        "analyzer"
    }
}

impl<A: Analyzer + ?Sized> Analyzer for &A {
    fn analyze(&self, path: &Path) -> AnalysisResult {
        (**self).analyze(path)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Runs `<command...> <path> --output-format=json --score=yes [--rcfile <cfg>]`.
#[derive(Debug, Clone)]
pub struct PylintAnalyzer {
    sandbox: PathSandbox,
    command: Vec<String>,
    timeout: Duration,
    rcfile: Option<PathBuf>,
    output_limit_bytes: usize,
}

impl PylintAnalyzer {
    pub fn new(sandbox: PathSandbox, command: Vec<String>) -> Self {
        Self {
            sandbox,
            command,
            timeout: DEFAULT_ANALYSIS_TIMEOUT,
            rcfile: None,
            output_limit_bytes: 1_000_000,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rcfile(mut self, rcfile: Option<PathBuf>) -> Self {
        self.rcfile = rcfile;
        self
    }

    pub fn with_output_limit(mut self, output_limit_bytes: usize) -> Self {
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    /// Analyze `path` with an explicit timeout and optional config file.
    #[instrument(skip_all, fields(path = %path.display(), timeout_secs = timeout.as_secs()))]
    pub fn analyze_with(
        &self,
        path: &Path,
        timeout: Duration,
        rcfile: Option<&Path>,
    ) -> AnalysisResult {
        let resolved = match self.sandbox.validate(path) {
            Ok(resolved) => resolved,
            Err(err) => return AnalysisResult::failed(err.to_string()),
        };
        if !has_source_extension(&resolved) {
            return AnalysisResult::failed(format!("not a python file: {}", resolved.display()));
        }
        if !resolved.is_file() {
            return AnalysisResult::failed(format!("file not found: {}", resolved.display()));
        }

        // The rcfile is resolved inside the sandbox like the analyzed path.
        let rcfile = match rcfile.map(|rcfile| self.sandbox.validate(rcfile)).transpose() {
            Ok(rcfile) => rcfile,
            Err(err) => return AnalysisResult::failed(format!("rcfile rejected: {err}")),
        };
        if let Some(rcfile) = &rcfile
            && !rcfile.is_file()
        {
            return AnalysisResult::failed(format!("rcfile not found: {}", rcfile.display()));
        }

        let mut cmd = match command_from_argv(&self.command) {
            Ok(cmd) => cmd,
            Err(err) => return AnalysisResult::failed(format!("analyzer command: {err}")),
        };
        cmd.arg(&resolved)
            .arg("--output-format=json")
            .arg("--score=yes");
        if let Some(rcfile) = rcfile {
            cmd.arg("--rcfile").arg(rcfile);
        }
        cmd.current_dir(self.sandbox.root());

        let output = match run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "analyzer failed to run");
                return AnalysisResult::failed(format!("analysis failed: {err:#}"));
            }
        };
        let execution_time = output.elapsed.as_secs_f64();

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "analyzer timed out");
            let mut result = AnalysisResult::failed(format!(
                "analysis timed out after {}s",
                timeout.as_secs()
            ));
            result
                .metadata
                .insert("execution_time".to_string(), Value::from(execution_time));
            return result;
        }

        let Some(return_code) = output.status.code() else {
            return AnalysisResult::failed("analyzer terminated by signal");
        };
        if return_code & USAGE_ERROR_BIT != 0 {
            let stderr = output.stderr_text();
            warn!(return_code, "analyzer usage error");
            return AnalysisResult::failed(format!(
                "analyzer usage error (exit {return_code}): {}",
                stderr.trim()
            ));
        }

        let report = parse_lint_output(&output.stdout_text(), &output.stderr_text());
        if !report.structured {
            debug!("analyzer output was not structured, score extracted from text");
        }
        let mut result = AnalysisResult {
            success: true,
            score: report.score,
            issues: report.issues,
            error: None,
            metadata: Default::default(),
        };
        let counts = result.count_by_category();
        let metadata = &mut result.metadata;
        metadata.insert("filepath".to_string(), Value::from(resolved.display().to_string()));
        metadata.insert("execution_time".to_string(), Value::from(execution_time));
        metadata.insert("return_code".to_string(), Value::from(return_code));
        metadata.insert("structured_output".to_string(), Value::from(report.structured));
        metadata.insert(
            "issue_count_by_type".to_string(),
            serde_json::to_value(counts).unwrap_or(Value::Null),
        );

        info!(
            score = result.score,
            issues = result.issues.len(),
            "analysis complete"
        );
        result
    }
}

impl Analyzer for PylintAnalyzer {
    fn analyze(&self, path: &Path) -> AnalysisResult {
        self.analyze_with(path, self.timeout, self.rcfile.as_deref())
    }

    fn name(&self) -> &str {
        self.command.first().map_or("analyzer", String::as_str)
    }
}
