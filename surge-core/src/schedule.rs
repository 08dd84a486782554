use std::time::Duration;

use crate::config::{ExecutorConfig, Stage};

/// Position inside a stage schedule at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: f64,
}

/// Piecewise-linear target over a list of stages, starting from `start`.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

const RECHECK_MAX: Duration = Duration::from_millis(50);

impl RampingSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    /// Schedule of a ramping executor; `None` for constant VUs.
    pub fn for_executor(executor: &ExecutorConfig) -> Option<Self> {
        match executor {
            ExecutorConfig::ConstantVus { .. } => None,
            ExecutorConfig::RampingVus { start_vus, stages } => {
                Some(Self::new(*start_vus, stages.clone()))
            }
            ExecutorConfig::RampingArrivalRate {
                start_rate, stages, ..
            } => Some(Self::new(*start_rate, stages.clone())),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends.last().copied().unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Index of the stage covering `elapsed` (the last one past the end).
    fn stage_index(&self, elapsed: Duration) -> usize {
        let idx = match self.cumulative_ends.binary_search(&elapsed) {
            // Exactly on a boundary belongs to the next stage.
            Ok(i) => i + 1,
            Err(i) => i,
        };
        idx.min(self.stages.len().saturating_sub(1))
    }

    fn bounds(&self, idx: usize) -> (Duration, Duration, u64, u64) {
        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        let start_target = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };
        (
            stage_start,
            self.cumulative_ends[idx],
            start_target,
            self.stages[idx].target,
        )
    }

    /// Interpolated target at `elapsed`.
    pub fn value_at(&self, elapsed: Duration) -> f64 {
        if self.stages.is_empty() {
            return self.start as f64;
        }
        if elapsed >= self.total_duration() {
            return self.stages.last().map(|s| s.target).unwrap_or(self.start) as f64;
        }

        let idx = self.stage_index(elapsed);
        let (stage_start, stage_end, start_target, end_target) = self.bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        if stage_duration.is_zero() {
            return end_target as f64;
        }

        let t = elapsed.saturating_sub(stage_start).as_secs_f64() / stage_duration.as_secs_f64();
        let (from, to) = (start_target as f64, end_target as f64);
        (from + (to - from) * t).max(0.0)
    }

    /// Interpolated target, floored.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        self.value_at(elapsed).floor() as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let clamped = elapsed.min(self.total_duration());
        let idx = self.stage_index(clamped);
        let (stage_start, stage_end, start_target, end_target) = self.bounds(idx);
        let stage_elapsed = clamped.saturating_sub(stage_start).min(stage_end - stage_start);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_end.saturating_sub(stage_start).saturating_sub(stage_elapsed),
            start_target,
            end_target,
            current_target: self.value_at(clamped),
        })
    }

    /// How long an inactive VU (1-based `vu`) may sleep before the ramp could reach it.
    pub fn next_recheck_in(&self, elapsed: Duration, vu: u64) -> Duration {
        let total = self.total_duration();
        if self.stages.is_empty() || elapsed >= total {
            return Duration::ZERO;
        }
        if vu <= self.target_at(elapsed) {
            return Duration::ZERO;
        }

        let idx = self.stage_index(elapsed);
        let (stage_start, stage_end, start_target, end_target) = self.bounds(idx);
        let until_stage_end = stage_end.saturating_sub(elapsed);

        // Flat or falling stages cannot reach this VU before they end.
        if end_target <= start_target || vu > end_target {
            return until_stage_end.clamp(Duration::from_millis(1), RECHECK_MAX);
        }

        // Solve start + (end - start) * t / d >= vu for t.
        let stage_duration = stage_end.saturating_sub(stage_start).as_secs_f64();
        let needed = (vu - start_target.min(vu)) as f64 * stage_duration
            / (end_target - start_target) as f64;
        let wait = Duration::from_secs_f64(needed).saturating_sub(elapsed.saturating_sub(stage_start));
        wait.clamp(Duration::from_millis(1), RECHECK_MAX)
    }
}
