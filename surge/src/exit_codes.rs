use surge_core::{RunResult, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// No threshold failed, but at least one had no data to judge.
    ThresholdsUndetermined = 12,

    /// A scenario failed to start or died, and no threshold failed.
    ScenarioFailed = 13,

    /// Invalid CLI/config/options (bad flags, invalid durations, invalid thresholds syntax, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, unexpected invariants).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_run_result(result: &RunResult) -> Self {
        if result.any_threshold(Verdict::Fail) {
            Self::ThresholdsFailed
        } else if !result.all_scenarios_completed() {
            Self::ScenarioFailed
        } else if result.any_threshold(Verdict::Undetermined) {
            Self::ThresholdsUndetermined
        } else {
            Self::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use surge_core::{MetricsSnapshot, ScenarioResult, ScenarioState, ThresholdOutcome};

    use super::*;

    fn result(states: &[ScenarioState], verdicts: &[Verdict]) -> RunResult {
        RunResult {
            scenarios: states
                .iter()
                .enumerate()
                .map(|(i, state)| ScenarioResult {
                    name: format!("s{i}"),
                    exec: "default".to_string(),
                    executor: None,
                    state: *state,
                    error: None,
                    start_time: Duration::ZERO,
                    elapsed: Duration::ZERO,
                })
                .collect(),
            snapshot: MetricsSnapshot::default(),
            thresholds: verdicts
                .iter()
                .map(|v| ThresholdOutcome {
                    key: "errors".to_string(),
                    expression: "rate<0.01".to_string(),
                    verdict: *v,
                    observed: None,
                    note: None,
                })
                .collect(),
            verdict: Verdict::Pass,
            interrupted: false,
        }
    }

    #[test]
    fn threshold_failure_wins_over_scenario_failure() {
        let r = result(
            &[ScenarioState::Completed, ScenarioState::Failed],
            &[Verdict::Fail, Verdict::Undetermined],
        );
        assert_eq!(ExitCode::from_run_result(&r), ExitCode::ThresholdsFailed);
    }

    #[test]
    fn scenario_failure_wins_over_undetermined() {
        let r = result(&[ScenarioState::Failed], &[Verdict::Undetermined]);
        assert_eq!(ExitCode::from_run_result(&r), ExitCode::ScenarioFailed);
    }

    #[test]
    fn undetermined_is_not_success() {
        let r = result(&[ScenarioState::Completed], &[Verdict::Pass, Verdict::Undetermined]);
        assert_eq!(ExitCode::from_run_result(&r), ExitCode::ThresholdsUndetermined);
        let r = result(&[ScenarioState::Completed], &[Verdict::Pass]);
        assert_eq!(ExitCode::from_run_result(&r), ExitCode::Success);
    }
}
