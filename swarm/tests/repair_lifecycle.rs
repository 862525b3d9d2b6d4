//! Session-level tests for full repair lifecycle scenarios.
//!
//! These drive `RepairMachine` through complete sessions with a real
//! `PytestRunner` backed by a shell script, verifying stage ordering,
//! iteration bookkeeping, forced termination and batch isolation.

#![cfg(unix)]

use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};
use serde_json::Value;

use swarm::batch::{FileStatus, run_batch};
use swarm::core::policy::{DEFAULT_MAX_ITERATIONS, StopReason};
use swarm::core::types::{TestResult, TestStats};
use swarm::io::experiment_log::Action;
use swarm::io::tester::PytestRunner;
use swarm::io::transformer::{TransformRequest, Transformer};
use swarm::machine::{RepairMachine, SessionConfig};
use swarm::test_support::{
    ScriptedAnalyzer, ScriptedTestRunner, ScriptedTransformer, TempSandbox,
};

const BUGGY: &str = "def total(n):\n    result = 0\n    for i in range(1, n):\n        result += i\n    return result\n";
const FIXED: &str = "def total(n):\n    result = 0\n    for i in range(1, n + 1):\n        result += i\n    return result\n";

/// Fake test tool: passes only once `calc.py` iterates up to `n` inclusive.
const TEST_ORACLE: &str = r#"if grep -q 'range(1, n + 1)' calc.py; then
  echo 'test_calc.py::test_total PASSED [100%]'
  echo '============ 1 passed in 0.01s ============'
else
  echo 'test_calc.py::test_total FAILED [100%]'
  echo '___________ test_total ___________'
  echo 'test_calc.py:4: in test_total'
  echo 'E   assert 3 == 6'
  echo '============ 1 failed in 0.01s ============'
  exit 1
fi
"#;

fn oracle_runner(sandbox: &TempSandbox) -> PytestRunner {
    let script = sandbox.outside().join("oracle.sh");
    fs::write(&script, TEST_ORACLE).expect("write oracle");
    PytestRunner::new(
        sandbox.sandbox(),
        vec!["sh".to_string(), script.display().to_string()],
    )
}

#[test]
fn off_by_one_fixed_on_second_cycle() {
    let sandbox = TempSandbox::new();
    let target = sandbox.target("calc.py", BUGGY, true);
    let tester = oracle_runner(&sandbox);
    let transformer = ScriptedTransformer::new(vec![
        Err(anyhow!("model unavailable")),
        Ok(format!("Here you go:\n```python\n{FIXED}```\n")),
    ]);
    let machine = RepairMachine::new(
        sandbox.store(),
        ScriptedAnalyzer::scoring(6.0),
        tester,
        &transformer,
        sandbox.log(),
        SessionConfig::default(),
    );

    let outcome = machine.run_session(&target).expect("session");

    assert_eq!(outcome.iterations, 2);
    assert!(outcome.success);
    assert!(outcome.tests_passed);
    assert_eq!(outcome.stop, StopReason::TestsPassed);
    assert_eq!(sandbox.read("calc.py"), FIXED);
    let last = outcome.last_tests.expect("tests");
    assert_eq!(last.stats.passed, 1);

    // The second request carries the failing report from the first judging.
    let requests = transformer.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].prior_tests.is_none());
    let prior = requests[1].prior_tests.as_ref().expect("prior tests");
    assert!(!prior.all_tests_passed);
    assert_eq!(prior.failed_tests[0].test_name, "test_total");
    assert!(requests[1].test_content.is_some());

    let backup = outcome.backup_path.expect("backup");
    assert_eq!(fs::read_to_string(backup).expect("backup"), BUGGY);
}

#[test]
fn always_failing_transformer_hits_ceiling_with_tests_still_failing() {
    let sandbox = TempSandbox::new();
    let target = sandbox.target("calc.py", BUGGY, true);
    let tester = oracle_runner(&sandbox);
    let transformer = ScriptedTransformer::always_failing();
    let machine = RepairMachine::new(
        sandbox.store(),
        ScriptedAnalyzer::scoring(6.0),
        tester,
        &transformer,
        sandbox.log(),
        SessionConfig::default(),
    );

    let outcome = machine.run_session(&target).expect("session");

    assert_eq!(outcome.iterations, DEFAULT_MAX_ITERATIONS);
    assert!(outcome.success);
    assert!(!outcome.tests_passed);
    assert_eq!(outcome.stop, StopReason::CeilingReached);
    assert_eq!(sandbox.read("calc.py"), BUGGY);
    assert_eq!(transformer.requests().len(), DEFAULT_MAX_ITERATIONS as usize);
}

#[test]
fn iteration_grows_by_one_per_audit_in_the_log() {
    let sandbox = TempSandbox::new();
    let target = sandbox.target("calc.py", BUGGY, true);
    let transformer = ScriptedTransformer::always_failing();
    let machine = RepairMachine::new(
        sandbox.store(),
        ScriptedAnalyzer::scoring(6.0),
        oracle_runner(&sandbox),
        &transformer,
        sandbox.log(),
        SessionConfig {
            max_iterations: 3,
            ..SessionConfig::default()
        },
    );
    machine.run_session(&target).expect("session");

    let entries = sandbox.log_entries();
    let actions: Vec<Action> = entries.iter().map(|entry| entry.action).collect();
    let cycle = [Action::CodeAnalysis, Action::Fix, Action::Debug];
    assert_eq!(actions, cycle.repeat(3));

    let audit_iterations: Vec<u64> = entries
        .iter()
        .filter(|entry| entry.action == Action::CodeAnalysis)
        .filter_map(|entry| entry.details["iteration"].as_u64())
        .collect();
    assert_eq!(audit_iterations, vec![1, 2, 3]);
    assert!(
        entries
            .iter()
            .filter(|entry| entry.action == Action::Fix)
            .all(|entry| entry.details["accepted"] == Value::Bool(false))
    );
}

/// Replaces the first target with a directory so writing the candidate
/// fails; every other target gets the fixed code.
struct SabotagingTransformer<'a> {
    root: &'a Path,
}

impl Transformer for SabotagingTransformer<'_> {
    fn transform(&self, request: &TransformRequest) -> Result<String> {
        if request.task_description.ends_with("a.py") {
            let path = self.root.join("a.py");
            fs::remove_file(&path)?;
            fs::create_dir(&path)?;
        }
        Ok(FIXED.to_string())
    }
}

#[test]
fn failed_session_does_not_stop_the_batch() {
    let sandbox = TempSandbox::new();
    sandbox.target("a.py", BUGGY, true);
    sandbox.target("b.py", BUGGY, true);
    let passing = TestResult::from_stats(TestStats::from_counts(1, 0, 0, 0), Vec::new());
    let failing = TestResult::from_stats(TestStats::from_counts(0, 1, 0, 0), Vec::new());
    let tester = ScriptedTestRunner::new(vec![failing.clone(), failing, passing]);
    let transformer = SabotagingTransformer {
        root: sandbox.root(),
    };
    let machine = RepairMachine::new(
        sandbox.store(),
        ScriptedAnalyzer::scoring(6.0),
        &tester,
        &transformer,
        sandbox.log(),
        SessionConfig::default(),
    );

    let report = run_batch(&machine, |_| {}).expect("batch");

    assert_eq!(report.processed, 2);
    assert_eq!(report.errored, 1);
    assert_eq!(report.fixed, 1);
    assert!(matches!(report.files[0].status, FileStatus::Errored(_)));
    assert!(matches!(report.files[1].status, FileStatus::Fixed(_)));
    assert_eq!(sandbox.read("b.py"), FIXED);
}
