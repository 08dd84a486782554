use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use surge_http::{HttpClient, HttpResponse};

use crate::collector::ScenarioMetrics;
use crate::config::ScenarioConfig;
use crate::outcome::{IterationOutcome, OutcomeErrorKind, RequestOutcome};
use crate::schedule::RampingSchedule;
use crate::signal::StopSignal;
use crate::workload::{Checks, IterationInfo, Workload, resolve_url};

/// Run-wide request settings every scenario shares.
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub base_url: Arc<str>,
    /// Added to every request that does not set the header itself.
    pub headers: Arc<[(String, String)]>,
    pub timeout: Option<Duration>,
}

/// Everything a scenario's VUs share while it runs.
pub struct ScenarioRun {
    config: ScenarioConfig,
    workload: Arc<dyn Workload>,
    client: Arc<HttpClient>,
    defaults: RequestDefaults,
    metrics: ScenarioMetrics,
    schedule: Option<RampingSchedule>,
    started: OnceLock<Instant>,
    next_iteration: AtomicU64,
    active_vus: AtomicU64,
    pool_vus: AtomicU64,
}

impl std::fmt::Debug for ScenarioRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioRun")
            .field("name", &self.config.name)
            .field("exec", &self.config.exec)
            .field("active_vus", &self.active_vus())
            .finish_non_exhaustive()
    }
}

impl ScenarioRun {
    pub fn new(
        config: ScenarioConfig,
        workload: Arc<dyn Workload>,
        client: Arc<HttpClient>,
        defaults: RequestDefaults,
        metrics: ScenarioMetrics,
    ) -> Self {
        let schedule = RampingSchedule::for_executor(&config.executor);
        Self {
            config,
            workload,
            client,
            defaults,
            metrics,
            schedule,
            started: OnceLock::new(),
            next_iteration: AtomicU64::new(0),
            active_vus: AtomicU64::new(0),
            pool_vus: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ScenarioMetrics {
        &self.metrics
    }

    /// Stage schedule of ramping executors.
    pub fn schedule(&self) -> Option<&RampingSchedule> {
        self.schedule.as_ref()
    }

    /// Fixes the scenario start instant (first call wins) and returns it.
    pub fn mark_started(&self) -> Instant {
        *self.started.get_or_init(Instant::now)
    }

    pub fn started(&self) -> Option<Instant> {
        self.started.get().copied()
    }

    pub fn elapsed(&self) -> Duration {
        self.started().map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn active_vus(&self) -> u64 {
        self.active_vus.load(Ordering::Relaxed)
    }

    pub fn pool_vus(&self) -> u64 {
        self.pool_vus.load(Ordering::Relaxed)
    }

    pub fn set_pool_vus(&self, n: u64) {
        self.pool_vus.store(n, Ordering::Relaxed);
    }

    /// Counts the caller as an active VU until the guard drops (unwinding included).
    pub fn active_guard(&self) -> ActiveGuard<'_> {
        self.active_vus.fetch_add(1, Ordering::Relaxed);
        ActiveGuard { run: self }
    }

    /// Runs one iteration for `vu`: build, send, classify, record.
    pub async fn iteration(&self, vu: u64) -> IterationOutcome {
        let iteration = self.next_iteration.fetch_add(1, Ordering::Relaxed);
        let info = IterationInfo {
            scenario: &self.config.name,
            vu,
            iteration,
            base_url: &self.defaults.base_url,
        };

        let started = Instant::now();
        let mut checks = Checks::new();

        let outcome = match self.workload.request(&info) {
            Ok(req) => self.exchange(req, &mut checks).await,
            Err(reason) => {
                tracing::debug!(scenario = %self.config.name, vu, %reason, "workload could not build a request");
                IterationOutcome::NotSent(OutcomeErrorKind::InvalidRequest)
            }
        };

        self.metrics.record(&outcome, &checks, started.elapsed());
        outcome
    }

    async fn exchange(&self, mut req: surge_http::HttpRequest, checks: &mut Checks) -> IterationOutcome {
        req.url = resolve_url(&self.defaults.base_url, &req.url);
        for (k, v) in self.defaults.headers.iter() {
            if !req.has_header(k) {
                req.headers.push((k.clone(), v.clone()));
            }
        }
        if req.timeout.is_none() {
            req.timeout = self.defaults.timeout;
        }

        let sent = Instant::now();
        match self.client.request(req).await {
            Ok(res) => {
                let latency = sent.elapsed();
                self.workload.check(&res, latency, checks);
                IterationOutcome::Completed(classify(&res, latency, checks))
            }
            Err(err) => match OutcomeErrorKind::from(err.transport_error_kind()) {
                // Malformed URL or headers: rejected before anything reached the wire.
                OutcomeErrorKind::InvalidRequest => {
                    IterationOutcome::NotSent(OutcomeErrorKind::InvalidRequest)
                }
                kind => IterationOutcome::Completed(RequestOutcome::failed(None, sent.elapsed(), kind)),
            },
        }
    }

    /// Sleeps the scenario's think time, cut short by `deadline` or a stop request.
    pub async fn think(&self, stop: &StopSignal, deadline: Option<Instant>) {
        let mut wait = self.config.think_time;
        if let Some(deadline) = deadline {
            wait = wait.min(deadline.saturating_duration_since(Instant::now()));
        }
        if wait.is_zero() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop.wait() => {}
        }
    }

    pub fn record_dropped(&self, n: u64) {
        self.metrics.record_dropped(n);
    }
}

/// Success iff every recorded check passed; with no checks, iff the status is 2xx.
fn classify(res: &HttpResponse, latency: Duration, checks: &Checks) -> RequestOutcome {
    let passed = if checks.is_empty() {
        res.is_success()
    } else {
        checks.all_passed()
    };
    if passed {
        return RequestOutcome::succeeded(res.status, latency);
    }

    let kind = if res.is_success() {
        OutcomeErrorKind::CheckFailed
    } else {
        OutcomeErrorKind::UnexpectedStatus
    };
    RequestOutcome::failed(Some(res.status), latency, kind)
}

pub struct ActiveGuard<'a> {
    run: &'a ScenarioRun,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.run.active_vus.fetch_sub(1, Ordering::Relaxed);
    }
}
