//! Repair session driver: `Auditing -> Fixing -> Judging` until termination.
//!
//! One [`RepairMachine`] owns the tool adapters for a sandbox and drives one
//! target at a time through [`RepairMachine::run_session`]. Stage routing and
//! the termination rules live in [`crate::core::policy`]; this module performs
//! the I/O for each stage and keeps [`RepairState`] current.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::candidate::accept_candidate;
use crate::core::policy::{
    Route, Stage, StopReason, judge_success, next_stage, route_after_judging,
};
use crate::core::quality::compare;
use crate::core::types::{AnalysisResult, AuditReport, TestResult};
use crate::io::analyzer::Analyzer;
use crate::io::config::SwarmConfig;
use crate::io::discovery::Target;
use crate::io::experiment_log::{Action, ExperimentLog, Status, generate_short_id};
use crate::io::file_store::FileStore;
use crate::io::tester::TestRunner;
use crate::io::transformer::{TransformRequest, Transformer};

const AUDIT_FILE_PREFIX: &str = ".swarm_audit_";

/// Mutable record threaded through one repair session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairState {
    pub target: PathBuf,
    pub test_file: Option<PathBuf>,
    /// Latest accepted candidate; only ever replaced wholesale.
    pub code: String,
    pub analysis: Option<AuditReport>,
    pub tests: Option<TestResult>,
    pub iteration: u32,
    pub success: bool,
    pub task_description: String,
}

impl RepairState {
    pub fn new(target: PathBuf, test_file: Option<PathBuf>, code: String) -> Self {
        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            target,
            test_file,
            code,
            analysis: None,
            tests: None,
            iteration: 0,
            success: false,
            task_description: format!("Analyze and fix bugs in {name}"),
        }
    }

    /// Whether the latest judging run executed and every test passed.
    pub fn tests_passed(&self) -> bool {
        self.tests
            .as_ref()
            .is_some_and(|tests| tests.success && tests.all_tests_passed)
    }
}

/// Knobs for one session, taken from [`SwarmConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_iterations: u32,
    pub min_candidate_chars: usize,
}

impl From<&SwarmConfig> for SessionConfig {
    fn from(cfg: &SwarmConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            min_candidate_chars: cfg.min_candidate_chars,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SwarmConfig::default())
    }
}

/// Result of one completed session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionOutcome {
    pub target: PathBuf,
    pub iterations: u32,
    /// True when tests passed or the iteration trigger forced termination.
    pub success: bool,
    /// True only when the final judging run passed every test.
    pub tests_passed: bool,
    pub final_code: String,
    pub last_analysis: Option<AnalysisResult>,
    pub last_tests: Option<TestResult>,
    pub stop: StopReason,
    pub backup_path: Option<PathBuf>,
}

pub struct RepairMachine<A, T, X> {
    store: FileStore,
    analyzer: A,
    tester: T,
    transformer: X,
    log: ExperimentLog,
    config: SessionConfig,
}

impl<A: Analyzer, T: TestRunner, X: Transformer> RepairMachine<A, T, X> {
    pub fn new(
        store: FileStore,
        analyzer: A,
        tester: T,
        transformer: X,
        log: ExperimentLog,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            analyzer,
            tester,
            transformer,
            log,
            config,
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn log(&self) -> &ExperimentLog {
        &self.log
    }

    /// Repair one target until its tests pass or the iteration limit is hit.
    ///
    /// The original file is backed up once before the first cycle and the
    /// final code is persisted atomically. Errors returned here are
    /// unexpected failures (unreadable target, failed write) that end the
    /// session.
    #[instrument(skip_all, fields(target = %target.source.display()))]
    pub fn run_session(&self, target: &Target) -> Result<SessionOutcome> {
        let read = self
            .store
            .read(&target.source)
            .context("read target")?;
        if !read.success {
            bail!(
                "read target {}: {}",
                target.source.display(),
                read.error.unwrap_or_default()
            );
        }
        let original = read.content.unwrap_or_default();

        let backup = self.store.backup(&target.source).context("backup target")?;
        if !backup.success {
            bail!(
                "backup target {}: {}",
                target.source.display(),
                backup.error.unwrap_or_default()
            );
        }
        let backup_path = backup.backup_path();

        let mut state = RepairState::new(read.path, target.test_file.clone(), original);
        info!(test_file = ?state.test_file, "repair session started");

        let mut stage = Stage::Auditing;
        let mut last_analysis = None;
        let mut stop = None;
        while stage != Stage::Terminated {
            let route = match stage {
                Stage::Auditing => {
                    self.audit(&mut state)?;
                    Route::Continue
                }
                Stage::Fixing => {
                    self.fix(&mut state);
                    Route::Continue
                }
                Stage::Judging => {
                    last_analysis = Some(self.judge(&mut state)?);
                    let route = route_after_judging(
                        state.success,
                        state.tests_passed(),
                        state.iteration,
                        self.config.max_iterations,
                    );
                    if let Route::Terminate(reason) = route {
                        stop = Some(reason);
                    }
                    route
                }
                Stage::Terminated => Route::Continue,
            };
            stage = next_stage(stage, route);
        }
        let stop = stop.ok_or_else(|| anyhow!("session ended without a stop reason"))?;

        let persisted = self
            .store
            .write(&state.target, &state.code, false)
            .context("persist final code")?;
        if !persisted.success {
            bail!(
                "persist final code {}: {}",
                state.target.display(),
                persisted.error.unwrap_or_default()
            );
        }

        info!(
            iterations = state.iteration,
            tests_passed = state.tests_passed(),
            stop = ?stop,
            "repair session finished"
        );
        Ok(SessionOutcome {
            target: state.target.clone(),
            iterations: state.iteration,
            success: state.success,
            tests_passed: state.tests_passed(),
            final_code: state.code,
            last_analysis,
            last_tests: state.tests,
            stop,
            backup_path,
        })
    }

    /// Analyze the current code through a scratch copy and run the existing
    /// tests. Increments the iteration counter.
    #[instrument(skip_all, fields(iteration = state.iteration + 1))]
    fn audit(&self, state: &mut RepairState) -> Result<()> {
        let scratch = ScratchFile::create(&self.store, &state.code)?;
        let lint = self.analyzer.analyze(scratch.path());
        drop(scratch);

        let tests = self.existing_test_file(state).map(|path| self.tester.run(path));
        state.analysis = Some(AuditReport { lint, tests });
        state.iteration += 1;

        if let Some(report) = &state.analysis {
            debug!(score = report.lint.score, issues = report.lint.issues.len(), "audit complete");
            self.log.record(
                "Auditor",
                self.analyzer.name(),
                Action::CodeAnalysis,
                json!({
                    "file": state.target.display().to_string(),
                    "iteration": state.iteration,
                    "input_prompt": state.task_description,
                    "output_response": report,
                }),
                Status::from_ok(report.lint.success),
            );
        }
        Ok(())
    }

    /// Ask the transformer for a replacement. Failures leave the code as is.
    #[instrument(skip_all, fields(iteration = state.iteration))]
    fn fix(&self, state: &mut RepairState) {
        let test_content = state
            .test_file
            .as_ref()
            .and_then(|path| self.store.read(path).ok())
            .filter(|read| read.success)
            .and_then(|read| read.content);
        let request = TransformRequest {
            code: state.code.clone(),
            task_description: state.task_description.clone(),
            analysis: state.analysis.clone(),
            test_content,
            prior_tests: state.tests.clone(),
        };

        let (accepted, response) = match self.transformer.transform(&request) {
            Ok(raw) => match accept_candidate(&raw, self.config.min_candidate_chars) {
                Some(code) => {
                    state.code = code;
                    (true, raw)
                }
                None => {
                    warn!(chars = raw.trim().len(), "rejected degenerate candidate");
                    (false, raw)
                }
            },
            Err(err) => {
                warn!(err = %format!("{err:#}"), "transformer failed, keeping current code");
                (false, format!("{err:#}"))
            }
        };

        self.log.record(
            "Fixer",
            self.transformer.name(),
            Action::Fix,
            json!({
                "file": state.target.display().to_string(),
                "iteration": state.iteration,
                "input_prompt": state.task_description,
                "output_response": response,
                "accepted": accepted,
            }),
            Status::from_ok(accepted),
        );
    }

    /// Write the candidate to the target, run the tests and re-analyze.
    /// Returns the candidate's analysis.
    #[instrument(skip_all, fields(iteration = state.iteration))]
    fn judge(&self, state: &mut RepairState) -> Result<AnalysisResult> {
        let written = self
            .store
            .write(&state.target, &state.code, false)
            .context("write candidate")?;
        if !written.success {
            bail!(
                "write candidate {}: {}",
                state.target.display(),
                written.error.unwrap_or_default()
            );
        }

        let tests = match self.existing_test_file(state) {
            Some(path) => self.tester.run(path),
            None => TestResult::failed("no tests found"),
        };
        let lint = self.analyzer.analyze(&state.target);
        let quality = state
            .analysis
            .as_ref()
            .map(|audit| compare(&audit.lint, &lint));

        state.tests = Some(tests);
        let passed = state.tests_passed();
        state.success = judge_success(passed, state.iteration, self.config.max_iterations);
        info!(tests_passed = passed, success = state.success, "judging complete");

        self.log.record(
            "Judge",
            self.tester.name(),
            Action::Debug,
            json!({
                "file": state.target.display().to_string(),
                "iteration": state.iteration,
                "input_prompt": state.task_description,
                "output_response": state.tests,
                "quality": quality,
                "success": state.success,
            }),
            Status::from_ok(passed),
        );
        Ok(lint)
    }

    fn existing_test_file<'s>(&self, state: &'s RepairState) -> Option<&'s Path> {
        state
            .test_file
            .as_deref()
            .filter(|path| self.tester.tests_exist(path))
    }
}

/// Uniquely named copy of the code in the sandbox root, removed on drop.
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    fn create(store: &FileStore, code: &str) -> Result<Self> {
        let name = format!("{AUDIT_FILE_PREFIX}{}.py", generate_short_id());
        let written = store
            .write(Path::new(&name), code, false)
            .context("write audit scratch file")?;
        if !written.success {
            bail!(
                "write audit scratch file: {}",
                written.error.unwrap_or_default()
            );
        }
        Ok(Self { path: written.path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), err = %err, "failed to remove scratch file");
        }
    }
}
