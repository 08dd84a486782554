use std::sync::Arc;
use std::time::Duration;

use surge_metrics::{MetricHandle, MetricKind, Registry};

use crate::error::Result;
use crate::outcome::IterationOutcome;
use crate::workload::Checks;

pub const HTTP_REQS: &str = "http_reqs";
/// Request latency in milliseconds.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Rate of failed requests.
pub const ERRORS: &str = "errors";
pub const HTTP_REQ_ERRORS: &str = "http_req_errors";
pub const CHECKS: &str = "checks";
pub const ITERATIONS: &str = "iterations";
/// Iteration time in milliseconds, think time excluded.
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const DROPPED_ITERATIONS: &str = "dropped_iterations";

/// Tags the engine sets itself; scenario tags with these keys are ignored.
const RESERVED_TAGS: &[&str] = &["scenario", "error_kind", "check"];

/// Kind of a metric the engine writes on its own.
pub fn builtin_kind(name: &str) -> Option<MetricKind> {
    match name {
        HTTP_REQS | HTTP_REQ_ERRORS | ITERATIONS | DROPPED_ITERATIONS => Some(MetricKind::Counter),
        ERRORS | CHECKS => Some(MetricKind::Rate),
        HTTP_REQ_DURATION | ITERATION_DURATION => Some(MetricKind::Trend),
        _ => None,
    }
}

#[inline]
fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

/// Writes one scenario's outcomes into the shared registry.
///
/// Handles for the fixed series are resolved once. Per-iteration series (checks, error kinds,
/// custom metrics) are resolved before the write group opens, never inside it.
#[derive(Debug, Clone)]
pub struct ScenarioMetrics {
    registry: Arc<Registry>,
    base_tags: Arc<[(String, String)]>,
    http_reqs: MetricHandle,
    http_req_duration: MetricHandle,
    errors: MetricHandle,
    iterations: MetricHandle,
    iteration_duration: MetricHandle,
    dropped_iterations: MetricHandle,
}

impl ScenarioMetrics {
    pub fn new(
        registry: Arc<Registry>,
        scenario: &str,
        scenario_tags: &[(String, String)],
    ) -> Result<Self> {
        let mut base_tags = vec![("scenario".to_string(), scenario.to_string())];
        for (k, v) in scenario_tags {
            if !RESERVED_TAGS.contains(&k.as_str()) {
                base_tags.push((k.clone(), v.clone()));
            }
        }
        let base_tags: Arc<[(String, String)]> = Arc::from(base_tags);

        let tags = tag_refs(&base_tags, None);
        let handle = |name: &str, kind| registry.handle(name, kind, &tags);

        Ok(Self {
            http_reqs: handle(HTTP_REQS, MetricKind::Counter)?,
            http_req_duration: handle(HTTP_REQ_DURATION, MetricKind::Trend)?,
            errors: handle(ERRORS, MetricKind::Rate)?,
            iterations: handle(ITERATIONS, MetricKind::Counter)?,
            iteration_duration: handle(ITERATION_DURATION, MetricKind::Trend)?,
            dropped_iterations: handle(DROPPED_ITERATIONS, MetricKind::Counter)?,
            registry: registry.clone(),
            base_tags: base_tags.clone(),
        })
    }

    /// Records one iteration and every series it touches as a single write group.
    ///
    /// Only iterations that sent a request count towards `http_reqs` and `http_req_duration`.
    /// Writes after the registry froze are dropped.
    pub fn record(&self, outcome: &IterationOutcome, checks: &Checks, iteration_duration: Duration) {
        let error_kind = outcome.error_kind().map(|kind| {
            let tags = tag_refs(&self.base_tags, Some(("error_kind", kind.as_ref())));
            self.registry.handle(HTTP_REQ_ERRORS, MetricKind::Counter, &tags)
        });

        let check_handles: Vec<(MetricHandle, bool)> = checks
            .results()
            .iter()
            .filter_map(|(name, passed)| {
                let tags = tag_refs(&self.base_tags, Some(("check", name.as_str())));
                self.registry
                    .handle(CHECKS, MetricKind::Rate, &tags)
                    .ok()
                    .map(|h| (h, *passed))
            })
            .collect();

        let custom: Vec<_> = checks
            .custom()
            .iter()
            .filter_map(|(name, obs)| {
                let tags = tag_refs(&self.base_tags, None);
                match self.registry.handle(name, obs.kind(), &tags) {
                    Ok(h) => Some((h, *obs)),
                    Err(err) => {
                        tracing::debug!(metric = %name, error = %err, "custom observation ignored");
                        None
                    }
                }
            })
            .collect();

        let Ok(group) = self.registry.write_group() else {
            return;
        };
        if let IterationOutcome::Completed(request) = outcome {
            group.add(&self.http_reqs, 1);
            group.record(&self.http_req_duration, millis(request.latency));
        }
        group.hit(&self.errors, !outcome.is_success());
        if let Some(Ok(h)) = &error_kind {
            group.add(h, 1);
        }
        for (h, passed) in &check_handles {
            group.hit(h, *passed);
        }
        for (h, obs) in &custom {
            group.observe(h, *obs);
        }
        group.add(&self.iterations, 1);
        group.record(&self.iteration_duration, millis(iteration_duration));
    }

    /// Counts iterations the arrival-rate pool had no worker for. They are neither requests nor
    /// errors.
    pub fn record_dropped(&self, n: u64) {
        if n == 0 {
            return;
        }
        if let Ok(group) = self.registry.write_group() {
            group.add(&self.dropped_iterations, n);
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.http_reqs.counter_total()
    }

    pub fn failures_total(&self) -> u64 {
        self.errors.rate_counts().0
    }

    pub fn iterations_total(&self) -> u64 {
        self.iterations.counter_total()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_iterations.counter_total()
    }
}

fn tag_refs<'a>(
    base: &'a [(String, String)],
    extra: Option<(&'a str, &'a str)>,
) -> Vec<(&'a str, &'a str)> {
    let mut tags: Vec<(&str, &str)> = base.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    tags.extend(extra);
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{OutcomeErrorKind, RequestOutcome};
    use surge_metrics::SeriesValue;

    fn metrics(reg: &Arc<Registry>) -> ScenarioMetrics {
        ScenarioMetrics::new(
            reg.clone(),
            "load",
            &[
                ("team".to_string(), "audit".to_string()),
                ("scenario".to_string(), "ignored".to_string()),
            ],
        )
        .unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn success_leaves_error_numerator_unchanged() {
        let reg = Arc::new(Registry::default());
        let m = metrics(&reg);
        let ok = IterationOutcome::Completed(RequestOutcome::succeeded(202, Duration::from_millis(12)));
        m.record(&ok, &Checks::new(), Duration::from_millis(13));

        let snap = reg.freeze();
        assert_eq!(snap.metric(HTTP_REQS).and_then(|v| v.counter_total()), Some(1));
        assert!(matches!(
            snap.metric(ERRORS),
            Some(SeriesValue::Rate { hits: 0, total: 1 })
        ));
        assert!(snap.metric(HTTP_REQ_ERRORS).is_none());
        let series = &snap.series()[0];
        assert_eq!(series.tag("scenario"), Some("load"));
        assert_eq!(series.tag("team"), Some("audit"));
    }

    #[test]
    fn failure_records_error_kind_and_checks() {
        let reg = Arc::new(Registry::default());
        let m = metrics(&reg);
        let mut checks = Checks::new();
        checks.check("status is 202", false);
        checks.trend("event_latency", 40.0);
        let failed = IterationOutcome::Completed(RequestOutcome::failed(
            Some(500),
            Duration::from_millis(40),
            OutcomeErrorKind::UnexpectedStatus,
        ));
        m.record(&failed, &checks, Duration::from_millis(41));

        let snap = reg.freeze();
        assert_eq!(snap.metric(ERRORS).and_then(|v| v.rate()), Some(1.0));
        let by_kind = snap.aggregate(
            HTTP_REQ_ERRORS,
            &[("error_kind".to_string(), "unexpected_status".to_string())],
        );
        assert_eq!(by_kind.and_then(|v| v.counter_total()), Some(1));
        assert_eq!(snap.metric(CHECKS).and_then(|v| v.rate()), Some(0.0));
        assert_eq!(
            snap.metric("event_latency").and_then(|v| v.trend().and_then(|t| t.max())),
            Some(40.0)
        );
        assert_eq!(m.failures_total(), 1);
    }

    #[test]
    fn dropped_iterations_are_not_requests() {
        let reg = Arc::new(Registry::default());
        let m = metrics(&reg);
        m.record_dropped(4);
        m.record_dropped(1);
        m.record_dropped(0);

        assert_eq!(m.dropped_total(), 5);
        let snap = reg.freeze();
        assert!(snap.metric(HTTP_REQS).is_none());
        assert!(snap.metric(ERRORS).is_none());
        assert_eq!(snap.metric(DROPPED_ITERATIONS).and_then(|v| v.counter_total()), Some(5));
    }

    #[test]
    fn unsent_iteration_is_an_error_but_not_a_request() {
        let reg = Arc::new(Registry::default());
        let m = metrics(&reg);
        let sent = IterationOutcome::Completed(RequestOutcome::succeeded(200, Duration::from_millis(30)));
        m.record(&sent, &Checks::new(), Duration::from_millis(31));
        m.record(
            &IterationOutcome::NotSent(OutcomeErrorKind::InvalidRequest),
            &Checks::new(),
            Duration::from_micros(5),
        );

        let snap = reg.freeze();
        assert_eq!(snap.metric(HTTP_REQS).and_then(|v| v.counter_total()), Some(1));
        let latency = snap
            .metric(HTTP_REQ_DURATION)
            .unwrap_or_else(|| panic!("latency missing"));
        assert_eq!(latency.trend().map(|t| t.count()), Some(1));
        assert_eq!(latency.trend().and_then(|t| t.min()), Some(30.0));
        assert!(matches!(
            snap.metric(ERRORS),
            Some(SeriesValue::Rate { hits: 1, total: 2 })
        ));
        let invalid = snap.aggregate(
            HTTP_REQ_ERRORS,
            &[("error_kind".to_string(), "invalid_request".to_string())],
        );
        assert_eq!(invalid.and_then(|v| v.counter_total()), Some(1));
        assert_eq!(snap.metric(ITERATIONS).and_then(|v| v.counter_total()), Some(2));
    }

    #[test]
    fn custom_metric_clashing_with_builtin_is_ignored() {
        let reg = Arc::new(Registry::default());
        let m = metrics(&reg);
        let mut checks = Checks::new();
        checks.trend(ERRORS, 1.0);
        m.record(
            &IterationOutcome::Completed(RequestOutcome::succeeded(200, Duration::from_millis(1))),
            &checks,
            Duration::from_millis(1),
        );
        assert_eq!(m.requests_total(), 1);
        assert_eq!(m.iterations_total(), 1);
    }
}
