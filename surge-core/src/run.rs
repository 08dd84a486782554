use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use surge_http::{DEFAULT_CONNECT_TIMEOUT, HttpClient};
use surge_metrics::{MetricsSnapshot, Registry, TrendMode};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::collector::ScenarioMetrics;
use crate::config::{ExecutorKind, ScenarioConfig, ScenarioOptions, scenario_from_options};
use crate::error::{Error, Result};
use crate::executor::executor_for;
use crate::progress::{ProgressFn, ProgressUpdate, StageProgress};
use crate::signal::StopSignal;
use crate::thresholds::{Threshold, ThresholdSet, parse_thresholds};
use crate::thresholds_eval::{ThresholdOutcome, Verdict, evaluate_thresholds, overall_verdict};
use crate::vu::{RequestDefaults, ScenarioRun};
use crate::workload::{Workload, Workloads};

pub const DEFAULT_BASE_URL: &str = "http://localhost:9080";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Global options shared by every scenario of a run.
#[derive(Clone)]
pub struct RunOptions {
    pub base_url: String,
    /// Sent with every request unless the workload sets the header itself.
    pub headers: Vec<(String, String)>,
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub trend_mode: TrendMode,
    pub progress: Option<ProgressFn>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            headers: Vec::new(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            trend_mode: TrendMode::default(),
            progress: None,
        }
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers.len())
            .field("request_timeout", &self.request_timeout)
            .field("trend_mode", &self.trend_mode)
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScenarioState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScenarioState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Completed,
            _ => Self::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Failed => 3,
        }
    }
}

#[derive(Debug, Default)]
struct SharedState(AtomicU8);

impl SharedState {
    fn get(&self) -> ScenarioState {
        ScenarioState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ScenarioState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// One scenario as planned: either ready to run or already known to fail.
pub struct PlannedScenario {
    pub name: String,
    pub exec: String,
    pub executor: Option<ExecutorKind>,
    pub start_time: Duration,
    setup: Result<(ScenarioConfig, Arc<dyn Workload>)>,
}

impl PlannedScenario {
    pub fn config(&self) -> Option<&ScenarioConfig> {
        self.setup.as_ref().ok().map(|(c, _)| c)
    }

    pub fn error(&self) -> Option<&Error> {
        self.setup.as_ref().err()
    }
}

impl std::fmt::Debug for PlannedScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedScenario")
            .field("name", &self.name)
            .field("exec", &self.exec)
            .field("start_time", &self.start_time)
            .field("error", &self.error())
            .finish_non_exhaustive()
    }
}

/// Validated scenarios and thresholds.
///
/// Problems with the run as a whole are returned as errors. Problems with a single scenario
/// are kept on that scenario, which then fails alone when the run starts.
#[derive(Debug)]
pub struct RunPlan {
    scenarios: Vec<PlannedScenario>,
    thresholds: Vec<Threshold>,
}

impl RunPlan {
    pub fn new(
        options: Vec<ScenarioOptions>,
        thresholds: &[ThresholdSet],
        workloads: &Workloads,
    ) -> Result<Self> {
        if options.is_empty() {
            return Err(Error::NoScenarios);
        }

        let mut seen = HashSet::new();
        for s in &options {
            if s.name.trim().is_empty() {
                return Err(Error::EmptyScenarioName);
            }
            if !seen.insert(s.name.as_str()) {
                return Err(Error::DuplicateScenario(s.name.clone()));
            }
        }

        let thresholds = parse_thresholds(thresholds)?;

        let scenarios = options
            .into_iter()
            .map(|s| {
                let name = s.name.clone();
                let exec = s.exec.clone().unwrap_or_else(|| s.name.clone());
                let executor = s
                    .executor
                    .as_deref()
                    .unwrap_or("constant-vus")
                    .parse::<ExecutorKind>()
                    .ok();
                let start_time = s.start_time.unwrap_or(Duration::ZERO);

                let setup = scenario_from_options(s).and_then(|config| {
                    let workload = workloads
                        .get(&config.exec)
                        .ok_or_else(|| Error::UnknownWorkload(config.exec.clone()))?;
                    Ok((config, workload))
                });

                PlannedScenario {
                    name,
                    exec,
                    executor,
                    start_time,
                    setup,
                }
            })
            .collect();

        Ok(Self {
            scenarios,
            thresholds,
        })
    }

    pub fn scenarios(&self) -> &[PlannedScenario] {
        &self.scenarios
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    /// Scenarios that will fail at start, with the reason.
    pub fn scenario_errors(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.scenarios
            .iter()
            .filter_map(|s| s.error().map(|e| (s.name.as_str(), e)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioResult {
    pub name: String,
    pub exec: String,
    pub executor: Option<ExecutorKind>,
    pub state: ScenarioState,
    pub error: Option<String>,
    /// Configured offset from the run start.
    pub start_time: Duration,
    /// Time the scenario spent running.
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub scenarios: Vec<ScenarioResult>,
    pub snapshot: MetricsSnapshot,
    pub thresholds: Vec<ThresholdOutcome>,
    pub verdict: Verdict,
    /// A stop was requested before the run ended on its own.
    pub interrupted: bool,
}

impl RunResult {
    pub fn all_scenarios_completed(&self) -> bool {
        self.scenarios
            .iter()
            .all(|s| s.state == ScenarioState::Completed)
    }

    pub fn any_threshold(&self, verdict: Verdict) -> bool {
        self.thresholds.iter().any(|t| t.verdict == verdict)
    }
}

struct LiveScenario {
    run: Arc<ScenarioRun>,
    state: Arc<SharedState>,
}

/// Runs every planned scenario at its offset and evaluates thresholds on the frozen metrics.
///
/// `stop` ends running scenarios cooperatively; scenarios that have not started yet fail.
pub async fn run(plan: RunPlan, opts: RunOptions, stop: StopSignal) -> RunResult {
    let registry = Arc::new(Registry::new(opts.trend_mode));
    let client = Arc::new(HttpClient::new(opts.connect_timeout));
    let defaults = RequestDefaults {
        base_url: Arc::from(opts.base_url.as_str()),
        headers: Arc::from(opts.headers.clone()),
        timeout: opts.request_timeout,
    };

    let RunPlan {
        scenarios,
        thresholds,
    } = plan;

    let run_start = tokio::time::Instant::now();
    let mut results = Vec::with_capacity(scenarios.len());
    let mut live = Vec::new();
    let mut tasks = JoinSet::new();

    for (idx, planned) in scenarios.into_iter().enumerate() {
        let mut result = ScenarioResult {
            name: planned.name,
            exec: planned.exec,
            executor: planned.executor,
            state: ScenarioState::Pending,
            error: None,
            start_time: planned.start_time,
            elapsed: Duration::ZERO,
        };

        let started = planned.setup.and_then(|(config, workload)| {
            let metrics = ScenarioMetrics::new(registry.clone(), &config.name, &config.tags)?;
            Ok(Arc::new(ScenarioRun::new(
                config,
                workload,
                client.clone(),
                defaults.clone(),
                metrics,
            )))
        });

        match started {
            Ok(scenario) => {
                let state = Arc::new(SharedState::default());
                tasks.spawn(drive_scenario(
                    idx,
                    scenario.clone(),
                    state.clone(),
                    run_start,
                    stop.clone(),
                ));
                live.push(LiveScenario {
                    run: scenario,
                    state,
                });
            }
            Err(err) => {
                tracing::warn!(scenario = %result.name, error = %err, "scenario rejected");
                result.state = ScenarioState::Failed;
                result.error = Some(err.to_string());
            }
        }
        results.push(result);
    }

    let progress_task = opts
        .progress
        .clone()
        .map(|progress| tokio::spawn(report_progress(live, progress)));

    while let Some(joined) = tasks.join_next().await {
        let (idx, exit) = match joined {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(error = %err, "scenario task failed");
                continue;
            }
        };
        let Some(result) = results.get_mut(idx) else {
            continue;
        };
        match exit {
            Ok(elapsed) => {
                result.state = ScenarioState::Completed;
                result.elapsed = elapsed;
            }
            Err((err, elapsed)) => {
                result.state = ScenarioState::Failed;
                result.error = Some(err.to_string());
                result.elapsed = elapsed;
            }
        }
    }

    if let Some(task) = progress_task {
        task.abort();
        let _ = task.await;
    }

    let snapshot = registry.freeze();
    let thresholds = evaluate_thresholds(&snapshot, &thresholds);

    // A task that died without reporting leaves its scenario Pending; that is a failure too.
    for r in results.iter_mut().filter(|r| r.state == ScenarioState::Pending) {
        r.state = ScenarioState::Failed;
        r.error.get_or_insert_with(|| "scenario task failed".to_string());
    }
    let all_completed = results.iter().all(|r| r.state == ScenarioState::Completed);
    let verdict = overall_verdict(&thresholds, all_completed);

    tracing::info!(
        %verdict,
        elapsed = ?snapshot.elapsed(),
        scenarios = results.len(),
        "run finished"
    );

    RunResult {
        scenarios: results,
        snapshot,
        thresholds,
        verdict,
        interrupted: stop.is_stopped(),
    }
}

type ScenarioExit = std::result::Result<Duration, (Error, Duration)>;

async fn drive_scenario(
    idx: usize,
    run: Arc<ScenarioRun>,
    state: Arc<SharedState>,
    run_start: tokio::time::Instant,
    stop: StopSignal,
) -> (usize, ScenarioExit) {
    let offset = run.config().start_time;
    if !offset.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep_until(run_start + offset) => {}
            _ = stop.wait() => {}
        }
    }
    if stop.is_stopped() {
        state.set(ScenarioState::Failed);
        tracing::warn!(scenario = %run.name(), "run aborted before scenario start");
        return (idx, Err((Error::AbortedBeforeStart, Duration::ZERO)));
    }

    let executor = executor_for(&run.config().executor);
    state.set(ScenarioState::Running);
    tracing::info!(
        scenario = %run.name(),
        exec = %run.config().exec,
        executor = %executor.kind(),
        "scenario started"
    );

    let driven = {
        let (run, stop) = (run.clone(), stop.clone());
        tokio::spawn(async move { executor.drive(run, stop).await })
    };
    let res = match driven.await {
        Ok(res) => res,
        Err(err) => Err(Error::Executor(err.to_string())),
    };

    let elapsed = run.elapsed();
    match res {
        Ok(()) => {
            state.set(ScenarioState::Completed);
            tracing::info!(
                scenario = %run.name(),
                elapsed = ?elapsed,
                requests = run.metrics().requests_total(),
                dropped_iterations = run.metrics().dropped_total(),
                "scenario completed"
            );
            (idx, Ok(elapsed))
        }
        Err(err) => {
            state.set(ScenarioState::Failed);
            tracing::warn!(scenario = %run.name(), error = %err, "scenario failed");
            (idx, Err((err, elapsed)))
        }
    }
}

async fn report_progress(live: Vec<LiveScenario>, progress: ProgressFn) {
    let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    let mut tick = 0u64;
    let mut last_at = Instant::now();
    let mut last_requests: Vec<u64> = live.iter().map(|s| s.run.metrics().requests_total()).collect();

    loop {
        interval.tick().await;
        tick += 1;
        let now = Instant::now();
        let dt = now.duration_since(last_at).as_secs_f64().max(1e-9);
        last_at = now;

        for (s, last) in live.iter().zip(last_requests.iter_mut()) {
            let requests_total = s.run.metrics().requests_total();
            let delta = requests_total.saturating_sub(*last);
            *last = requests_total;

            if s.state.get() != ScenarioState::Running {
                continue;
            }
            progress(progress_update(tick, &s.run, delta as f64 / dt));
        }
    }
}

fn progress_update(tick: u64, run: &ScenarioRun, rps_now: f64) -> ProgressUpdate {
    let config = run.config();
    let elapsed = run.elapsed();
    let metrics = run.metrics();

    let stage = run
        .schedule()
        .and_then(|s| s.stage_snapshot_at(elapsed))
        .map(|st| StageProgress {
            stage: st.index + 1,
            stages: st.count,
            stage_elapsed: st.stage_elapsed,
            stage_remaining: st.stage_remaining,
            start_target: st.start_target,
            end_target: st.end_target,
            current_target: st.current_target,
        });

    ProgressUpdate {
        tick,
        elapsed,
        scenario: config.name.clone(),
        exec: config.exec.clone(),
        executor: config.executor.kind(),
        planned_duration: config.executor.planned_duration(),
        active_vus: run.active_vus(),
        pool_vus: run.pool_vus(),
        max_vus: config.executor.max_vus(),
        stage,
        requests_total: metrics.requests_total(),
        failures_total: metrics.failures_total(),
        iterations_total: metrics.iterations_total(),
        dropped_total: metrics.dropped_total(),
        rps_now,
    }
}
