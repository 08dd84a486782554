use std::sync::Arc;
use std::time::Duration;

use crate::config::ExecutorKind;

#[derive(Debug, Clone, PartialEq)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: f64,
}

/// Live view of one running scenario, emitted once per second.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based) for progress emissions.
    pub tick: u64,
    /// Time since the scenario started.
    pub elapsed: Duration,
    pub scenario: String,
    pub exec: String,
    pub executor: ExecutorKind,
    pub planned_duration: Option<Duration>,
    /// VUs currently running iterations (or busy workers, for arrival rate).
    pub active_vus: u64,
    /// Spawned workers; equals `active_vus` outside arrival rate.
    pub pool_vus: u64,
    pub max_vus: u64,
    pub stage: Option<StageProgress>,
    pub requests_total: u64,
    pub failures_total: u64,
    pub iterations_total: u64,
    pub dropped_total: u64,
    /// Requests/sec observed during the last progress interval.
    pub rps_now: f64,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
