//! Swarm configuration, read from `<target_dir>/.swarm.toml` or `--config`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::policy::DEFAULT_MAX_ITERATIONS;
use crate::io::atomic::write_atomic;

/// Config file name looked up in the target directory.
pub const CONFIG_FILE_NAME: &str = ".swarm.toml";

/// Swarm configuration (TOML).
///
/// Missing fields fall back to defaults, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SwarmConfig {
    /// Iteration at which judging forces termination.
    pub max_iterations: u32,

    pub analysis_timeout_secs: u64,

    /// Must exceed `analysis_timeout_secs`.
    pub test_timeout_secs: u64,

    pub transform_timeout_secs: u64,

    /// Truncate captured child stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Transformer output shorter than this (after trimming) is rejected.
    pub min_candidate_chars: usize,

    /// Experiment log location, relative to the working directory.
    pub log_path: PathBuf,

    pub analyzer: AnalyzerConfig,
    pub tester: TesterConfig,
    pub transformer: TransformerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub command: Vec<String>,
    pub rcfile: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TesterConfig {
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransformerConfig {
    /// Empty means no transformer is configured.
    pub command: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: vec!["pylint".to_string()],
            rcfile: None,
        }
    }
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            command: vec!["pytest".to_string()],
        }
    }
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            analysis_timeout_secs: 30,
            test_timeout_secs: 60,
            transform_timeout_secs: 300,
            output_limit_bytes: 1_000_000,
            min_candidate_chars: 10,
            log_path: PathBuf::from("logs/experiment_data.json"),
            analyzer: AnalyzerConfig::default(),
            tester: TesterConfig::default(),
            transformer: TransformerConfig::default(),
        }
    }
}

impl SwarmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.analysis_timeout_secs == 0 {
            return Err(anyhow!("analysis_timeout_secs must be > 0"));
        }
        if self.test_timeout_secs == 0 {
            return Err(anyhow!("test_timeout_secs must be > 0"));
        }
        if self.transform_timeout_secs == 0 {
            return Err(anyhow!("transform_timeout_secs must be > 0"));
        }
        if self.analysis_timeout_secs >= self.test_timeout_secs {
            return Err(anyhow!(
                "test_timeout_secs ({}) must exceed analysis_timeout_secs ({})",
                self.test_timeout_secs,
                self.analysis_timeout_secs
            ));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if !is_usable_command(&self.analyzer.command) {
            return Err(anyhow!("analyzer.command must be a non-empty array"));
        }
        if !is_usable_command(&self.tester.command) {
            return Err(anyhow!("tester.command must be a non-empty array"));
        }
        if !self.transformer.command.is_empty() && !is_usable_command(&self.transformer.command) {
            return Err(anyhow!("transformer.command must not start with an empty program"));
        }
        Ok(())
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_secs(self.transform_timeout_secs)
    }
}

fn is_usable_command(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SwarmConfig::default()`.
pub fn load_config(path: &Path) -> Result<SwarmConfig> {
    if !path.exists() {
        let cfg = SwarmConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SwarmConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SwarmConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir {}", parent.display()))?;
    }
    write_atomic(path, buf.as_bytes()).with_context(|| format!("write config {}", path.display()))
}
