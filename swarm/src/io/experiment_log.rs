//! Append-only JSON experiment log (`logs/experiment_data.json` by default).
//!
//! Each stage of a repair session appends one entry. The file holds a single
//! JSON array and is rewritten atomically on every append. A file that no
//! longer parses is replaced by a fresh array. Write failures are warned
//! about and never interrupt a session.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::io::atomic::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "STARTUP")]
    Startup,
    #[serde(rename = "CODE_ANALYSIS")]
    CodeAnalysis,
    #[serde(rename = "FIX")]
    Fix,
    #[serde(rename = "DEBUG")]
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    pub fn from_ok(ok: bool) -> Self {
        if ok { Status::Success } else { Status::Failure }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub agent: String,
    /// Tool backing the stage (analyzer/test/transformer program).
    pub model: String,
    pub action: Action,
    pub details: Value,
    pub status: Status,
}

#[derive(Debug, Clone)]
pub struct ExperimentLog {
    path: PathBuf,
}

impl ExperimentLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, warning (not failing) when the log cannot be written.
    pub fn record(&self, agent: &str, model: &str, action: Action, details: Value, status: Status) {
        let entry = LogEntry {
            id: generate_short_id(),
            timestamp: Local::now().to_rfc3339(),
            agent: agent.to_string(),
            model: model.to_string(),
            action,
            details,
            status,
        };
        if let Err(err) = self.append(entry) {
            warn!(path = %self.path.display(), err = %format!("{err:#}"), "failed to write experiment log");
        }
    }

    fn append(&self, entry: LogEntry) -> Result<()> {
        let mut entries = match read_entries(&self.path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    err = %format!("{err:#}"),
                    "experiment log was corrupt, starting a new one"
                );
                Vec::new()
            }
        };
        entries.push(entry);
        write_entries(&self.path, &entries)?;
        debug!(entries = entries.len(), "experiment log updated");
        Ok(())
    }
}

/// Read all entries. A missing or blank file is an empty log.
pub fn read_entries(path: &Path) -> Result<Vec<LogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn write_entries(path: &Path, entries: &[LogEntry]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(entries).context("serialize experiment log")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes()).with_context(|| format!("write {}", path.display()))
}

/// Six lowercase alphanumeric characters.
pub fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appends_entries_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = ExperimentLog::new(temp.path().join("logs/experiment_data.json"));
        log.record("System", "swarm", Action::Startup, json!({"target_dir": "x"}), Status::Success);
        log.record(
            "Auditor",
            "pylint",
            Action::CodeAnalysis,
            json!({"input_prompt": "a", "output_response": "b"}),
            Status::Failure,
        );

        let entries = read_entries(log.path()).expect("read");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, Action::Startup);
        assert_eq!(entries[1].agent, "Auditor");
        assert_eq!(entries[1].status, Status::Failure);
        assert_eq!(entries[1].id.len(), 6);
        let files = fs::read_dir(temp.path().join("logs")).expect("read_dir").count();
        assert_eq!(files, 1);
    }

    #[test]
    fn serializes_wire_names() {
        let entry = LogEntry {
            id: "abc123".to_string(),
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            agent: "Fixer".to_string(),
            model: "fixer".to_string(),
            action: Action::CodeAnalysis,
            details: json!({}),
            status: Status::Success,
        };
        let value = serde_json::to_value(&entry).expect("json");
        assert_eq!(value["action"], "CODE_ANALYSIS");
        assert_eq!(value["status"], "SUCCESS");
    }

    #[test]
    fn corrupt_file_is_replaced() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("experiment_data.json");
        fs::write(&path, "[{not json").expect("write");
        let log = ExperimentLog::new(&path);
        log.record("Judge", "pytest", Action::Debug, json!({}), Status::Success);

        let entries = read_entries(&path).expect("read");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, Action::Debug);
    }

    #[test]
    fn unwritable_location_is_not_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("file");
        fs::write(&blocker, "").expect("write");
        let log = ExperimentLog::new(blocker.join("nested/log.json"));
        log.record("System", "swarm", Action::Startup, json!({}), Status::Success);
        assert!(!blocker.join("nested").exists());
    }

    #[test]
    fn short_ids_are_lowercase_alphanumeric() {
        let id = generate_short_id();
        assert_eq!(id.len(), 6);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
