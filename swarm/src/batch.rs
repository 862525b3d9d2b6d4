//! Batch driver for `swarm --target-dir <DIR>`.
//!
//! Discovers targets in the sandbox root and runs one repair session per
//! paired file, sequentially. A session that fails is recorded and the batch
//! moves on to the next file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::io::analyzer::{Analyzer, PylintAnalyzer};
use crate::io::config::{CONFIG_FILE_NAME, load_config};
use crate::io::discovery::{Target, discover_targets};
use crate::io::experiment_log::{Action, ExperimentLog, Status};
use crate::io::file_store::FileStore;
use crate::io::sandbox::PathSandbox;
use crate::io::tester::{PytestRunner, TestRunner};
use crate::io::transformer::{CommandTransformer, Transformer, UnconfiguredTransformer};
use crate::machine::{RepairMachine, SessionConfig, SessionOutcome};

/// The requested target directory does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("target directory {} does not exist", path.display())]
pub struct TargetDirMissing {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileStatus {
    /// Tests pass against the final code.
    Fixed(Box<SessionOutcome>),
    /// The session ended without passing tests.
    Unfixed(Box<SessionOutcome>),
    /// No test file was found.
    Skipped,
    /// The session ended with an unexpected error.
    Errored(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub source: PathBuf,
    pub status: FileStatus,
}

impl FileReport {
    pub fn outcome(&self) -> Option<&SessionOutcome> {
        match &self.status {
            FileStatus::Fixed(outcome) | FileStatus::Unfixed(outcome) => Some(outcome.as_ref()),
            FileStatus::Skipped | FileStatus::Errored(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Sessions run (skipped files excluded).
    pub processed: usize,
    pub fixed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub files: Vec<FileReport>,
}

impl BatchReport {
    fn push(&mut self, report: FileReport) {
        match report.status {
            FileStatus::Fixed(_) => {
                self.processed += 1;
                self.fixed += 1;
            }
            FileStatus::Unfixed(_) => self.processed += 1,
            FileStatus::Skipped => self.skipped += 1,
            FileStatus::Errored(_) => {
                self.processed += 1;
                self.errored += 1;
            }
        }
        self.files.push(report);
    }
}

/// Inputs for a full run of the binary.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub target_dir: PathBuf,
    /// Defaults to `<target_dir>/.swarm.toml`.
    pub config_path: Option<PathBuf>,
    /// Overrides `[transformer] command` when non-empty.
    pub transformer: Vec<String>,
}

/// Validate the target directory, load config, build the tool stack and run
/// the batch.
///
/// A missing target directory fails with [`TargetDirMissing`] before any
/// sandbox state is created.
#[instrument(skip_all, fields(target_dir = %request.target_dir.display()))]
pub fn run<F: FnMut(&FileReport)>(request: &RunRequest, on_file: F) -> Result<BatchReport> {
    if !request.target_dir.is_dir() {
        return Err(TargetDirMissing {
            path: request.target_dir.clone(),
        }
        .into());
    }

    let config_path = request
        .config_path
        .clone()
        .unwrap_or_else(|| request.target_dir.join(CONFIG_FILE_NAME));
    let mut cfg = load_config(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    if !request.transformer.is_empty() {
        cfg.transformer.command = request.transformer.clone();
        cfg.validate()?;
    }

    let sandbox = PathSandbox::new(&request.target_dir)
        .with_context(|| format!("open sandbox {}", request.target_dir.display()))?;
    let log = ExperimentLog::new(&cfg.log_path);
    log.record(
        "System",
        "swarm",
        Action::Startup,
        json!({ "target_dir": sandbox.root().display().to_string() }),
        Status::Success,
    );

    let analyzer = PylintAnalyzer::new(sandbox.clone(), cfg.analyzer.command.clone())
        .with_timeout(cfg.analysis_timeout())
        .with_rcfile(cfg.analyzer.rcfile.clone())
        .with_output_limit(cfg.output_limit_bytes);
    let tester = PytestRunner::new(sandbox.clone(), cfg.tester.command.clone())
        .with_timeout(cfg.test_timeout())
        .with_output_limit(cfg.output_limit_bytes);
    let transformer: Box<dyn Transformer> = if cfg.transformer.command.is_empty() {
        warn!("no transformer configured, sessions will run to the iteration limit");
        Box::new(UnconfiguredTransformer)
    } else {
        Box::new(CommandTransformer::new(
            cfg.transformer.command.clone(),
            cfg.transform_timeout(),
            cfg.output_limit_bytes,
        ))
    };

    let machine = RepairMachine::new(
        FileStore::new(sandbox),
        analyzer,
        tester,
        transformer.as_ref(),
        log,
        SessionConfig::from(&cfg),
    );
    run_batch(&machine, on_file)
}

/// Run one session per discovered target, in discovery order.
pub fn run_batch<A, T, X, F>(machine: &RepairMachine<A, T, X>, mut on_file: F) -> Result<BatchReport>
where
    A: Analyzer,
    T: TestRunner,
    X: Transformer,
    F: FnMut(&FileReport),
{
    let targets = discover_targets(machine.store().sandbox())?;
    info!(targets = targets.len(), "batch started");

    let mut report = BatchReport::default();
    for target in targets {
        let file = run_target(machine, target);
        on_file(&file);
        report.push(file);
    }

    info!(
        processed = report.processed,
        fixed = report.fixed,
        skipped = report.skipped,
        errored = report.errored,
        "batch finished"
    );
    Ok(report)
}

fn run_target<A: Analyzer, T: TestRunner, X: Transformer>(
    machine: &RepairMachine<A, T, X>,
    target: Target,
) -> FileReport {
    if target.test_file.is_none() {
        return FileReport {
            source: target.source,
            status: FileStatus::Skipped,
        };
    }

    match machine.run_session(&target) {
        Ok(outcome) => FileReport {
            source: target.source,
            status: if outcome.tests_passed {
                FileStatus::Fixed(Box::new(outcome))
            } else {
                FileStatus::Unfixed(Box::new(outcome))
            },
        },
        Err(err) => {
            error!(source = %target.source.display(), err = %format!("{err:#}"), "repair session failed");
            FileReport {
                source: target.source,
                status: FileStatus::Errored(format!("{err:#}")),
            }
        }
    }
}

/// One-line console summary for a file.
pub fn describe(report: &FileReport, root: &Path) -> String {
    let name = report
        .source
        .strip_prefix(root)
        .unwrap_or(report.source.as_path())
        .display();
    match &report.status {
        FileStatus::Fixed(outcome) => {
            format!("FIXED    {name} (iterations: {})", outcome.iterations)
        }
        FileStatus::Unfixed(outcome) => format!(
            "UNFIXED  {name} (iterations: {}, stop: {:?})",
            outcome.iterations, outcome.stop
        ),
        FileStatus::Skipped => format!("SKIPPED  {name} (no test file)"),
        FileStatus::Errored(err) => format!("ERROR    {name}: {err}"),
    }
}
