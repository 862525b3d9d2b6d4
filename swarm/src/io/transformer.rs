//! Code-transformer abstraction consumed by the fixing stage.
//!
//! The [`Transformer`] trait hides the external capability that proposes a
//! full replacement of the code under repair. [`CommandTransformer`] feeds
//! the request as JSON on a child's stdin and reads the replacement from
//! stdout. Tests use scripted transformers that return canned code.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{AuditReport, TestResult};
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Everything the transformer sees for one fixing stage.
#[derive(Debug, Clone, Serialize)]
pub struct TransformRequest {
    pub code: String,
    pub task_description: String,
    pub analysis: Option<AuditReport>,
    pub test_content: Option<String>,
    /// Test report from the previous judging stage, if any.
    pub prior_tests: Option<TestResult>,
}

pub trait Transformer {
    /// Return replacement code text (possibly wrapped in a fenced block).
    fn transform(&self, request: &TransformRequest) -> Result<String>;

    /// Label recorded in the experiment log.
    fn name(&self) -> &str {
        "transformer"
    }
}

impl<T: Transformer + ?Sized> Transformer for &T {
    fn transform(&self, request: &TransformRequest) -> Result<String> {
        (**self).transform(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Transformer that spawns a configured command.
#[derive(Debug, Clone)]
pub struct CommandTransformer {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandTransformer {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }
}

impl Transformer for CommandTransformer {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn transform(&self, request: &TransformRequest) -> Result<String> {
        info!(program = ?self.command.first(), "starting transformer");
        let payload = serde_json::to_vec(request).context("serialize transform request")?;
        let cmd = command_from_argv(&self.command)?;

        let output = run_command_with_timeout(
            cmd,
            Some(&payload),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run transformer")?;

        if output.timed_out {
            warn!(
                timeout_secs = self.timeout.as_secs(),
                "transformer timed out"
            );
            bail!("transformer timed out after {:?}", self.timeout);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "transformer failed");
            return Err(anyhow!(
                "transformer failed with status {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            ));
        }
        if output.stdout_truncated > 0 {
            bail!(
                "transformer output exceeded {} bytes",
                self.output_limit_bytes
            );
        }

        debug!(bytes = output.stdout.len(), "transformer completed");
        String::from_utf8(output.stdout).context("transformer output is not utf-8")
    }

    fn name(&self) -> &str {
        self.command.first().map_or("transformer", String::as_str)
    }
}

/// Stand-in used when no transformer command is configured. Every call
/// fails, so sessions run until forced termination.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTransformer;

impl Transformer for UnconfiguredTransformer {
    fn transform(&self, _request: &TransformRequest) -> Result<String> {
        Err(anyhow!("no transformer command configured"))
    }

    fn name(&self) -> &str {
        "unconfigured"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TransformRequest {
        TransformRequest {
            code: "def f():\n    return 0\n".to_string(),
            task_description: "Analyze and fix bugs in f.py".to_string(),
            analysis: None,
            test_content: Some("def test_f():\n    assert f() == 1\n".to_string()),
            prior_tests: None,
        }
    }

    fn sh(script: &str) -> CommandTransformer {
        CommandTransformer::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            Duration::from_secs(10),
            1024 * 1024,
        )
    }

    #[cfg(unix)]
    #[test]
    fn returns_stdout_as_replacement() {
        let out = sh("cat >/dev/null; printf 'def f():\\n    return 1\\n'")
            .transform(&request())
            .expect("transform");
        assert_eq!(out, "def f():\n    return 1\n");
    }

    #[cfg(unix)]
    #[test]
    fn request_is_sent_as_json() {
        let out = sh("cat").transform(&request()).expect("transform");
        let value: serde_json::Value = serde_json::from_str(&out).expect("json");
        assert_eq!(value["task_description"], "Analyze and fix bugs in f.py");
        assert!(value["analysis"].is_null());
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_an_error() {
        let err = sh("echo 'quota exceeded' >&2; exit 2")
            .transform(&request())
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_is_an_error() {
        let transformer = CommandTransformer::new(
            vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(200),
            1024,
        );
        let err = transformer.transform(&request()).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn unconfigured_always_fails() {
        let err = UnconfiguredTransformer.transform(&request()).unwrap_err();
        assert!(err.to_string().contains("no transformer"));
    }
}
