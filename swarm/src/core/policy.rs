//! Deterministic stage routing and termination rules for the repair loop.
//!
//! A cycle is `Auditing -> Fixing -> Judging`. After judging the loop either
//! returns to `Auditing` or terminates. `success` becomes true when the tests
//! pass or when the iteration counter reaches the forced-termination
//! trigger; callers distinguish the two through [`StopReason`].

use serde::Serialize;

/// Iteration at which judging forces `success = true`.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Repair loop stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Auditing,
    Fixing,
    Judging,
    Terminated,
}

/// Why a repair session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The test file passed against the candidate.
    TestsPassed,
    /// Judging forced success at the iteration trigger without passing tests.
    CeilingReached,
    /// The iteration counter went past the trigger without a forced success.
    HardLimit,
}

/// Routing decision taken after `Judging`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Continue,
    Terminate(StopReason),
}

/// Success flag set by `Judging`.
pub fn judge_success(tests_passed: bool, iteration: u32, max_iterations: u32) -> bool {
    tests_passed || iteration >= max_iterations
}

/// Decide the next stage after `Judging`.
///
/// The hard limit (`iteration > max_iterations`) holds regardless of
/// `success`, so a session never runs more than `max_iterations + 1` cycles.
pub fn route_after_judging(
    success: bool,
    tests_passed: bool,
    iteration: u32,
    max_iterations: u32,
) -> Route {
    if success {
        let reason = if tests_passed {
            StopReason::TestsPassed
        } else {
            StopReason::CeilingReached
        };
        return Route::Terminate(reason);
    }
    if iteration > max_iterations {
        return Route::Terminate(StopReason::HardLimit);
    }
    Route::Continue
}

/// Stage that follows `stage` given a routing decision for `Judging`.
pub fn next_stage(stage: Stage, route: Route) -> Stage {
    match stage {
        Stage::Auditing => Stage::Fixing,
        Stage::Fixing => Stage::Judging,
        Stage::Judging => match route {
            Route::Continue => Stage::Auditing,
            Route::Terminate(_) => Stage::Terminated,
        },
        Stage::Terminated => Stage::Terminated,
    }
}
