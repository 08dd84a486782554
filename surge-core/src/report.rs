use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;
use surge_metrics::{MetricsSnapshot, SeriesValue};

use crate::collector::{DROPPED_ITERATIONS, ERRORS, HTTP_REQ_DURATION, HTTP_REQS, ITERATIONS};
use crate::run::{RunResult, ScenarioState};
use crate::thresholds_eval::Verdict;

/// Percentiles reported for every trend.
const TREND_PERCENTILES: &[(&str, f64)] = &[("p(90)", 90.0), ("p(95)", 95.0), ("p(99)", 99.0)];

/// Machine-readable run summary. Maps are ordered, so rendering is deterministic.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub verdict: Verdict,
    pub interrupted: bool,
    /// Run time in seconds.
    pub duration: f64,
    pub overview: Overview,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub thresholds: BTreeMap<String, Vec<ThresholdSummary>>,
    pub scenarios: Vec<ScenarioSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub total_requests: u64,
    /// Requests per second over the run.
    pub request_rate: f64,
    /// Fraction of requests that succeeded, when any were made.
    pub success_rate: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub p50_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub iterations: u64,
    pub dropped_iterations: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    #[serde(rename = "type")]
    pub kind: String,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdSummary {
    pub expression: String,
    pub verdict: Verdict,
    pub observed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub name: String,
    pub exec: String,
    pub executor: Option<String>,
    pub state: ScenarioState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Offset from the run start, in seconds.
    pub start_time: f64,
    /// Time spent running, in seconds.
    pub elapsed: f64,
}

impl Summary {
    pub fn from_result(result: &RunResult) -> Self {
        let snap = &result.snapshot;

        let mut thresholds: BTreeMap<String, Vec<ThresholdSummary>> = BTreeMap::new();
        for t in &result.thresholds {
            thresholds.entry(t.key.clone()).or_default().push(ThresholdSummary {
                expression: t.expression.clone(),
                verdict: t.verdict,
                observed: t.observed,
                note: t.note.clone(),
            });
        }

        let scenarios = result
            .scenarios
            .iter()
            .map(|s| ScenarioSummary {
                name: s.name.clone(),
                exec: s.exec.clone(),
                executor: s.executor.map(|k| k.to_string()),
                state: s.state,
                error: s.error.clone(),
                start_time: s.start_time.as_secs_f64(),
                elapsed: s.elapsed.as_secs_f64(),
            })
            .collect();

        Self {
            verdict: result.verdict,
            interrupted: result.interrupted,
            duration: snap.elapsed().as_secs_f64(),
            overview: overview(snap),
            metrics: metric_summaries(snap),
            thresholds,
            scenarios,
        }
    }
}

fn counter_total(snap: &MetricsSnapshot, name: &str) -> u64 {
    snap.metric(name).and_then(|v| v.counter_total()).unwrap_or(0)
}

fn overview(snap: &MetricsSnapshot) -> Overview {
    let total_requests = counter_total(snap, HTTP_REQS);
    let latency = snap.metric(HTTP_REQ_DURATION);
    let trend = latency.as_ref().and_then(|v| v.trend());

    Overview {
        total_requests,
        request_rate: snap.per_sec(total_requests),
        success_rate: match snap.metric(ERRORS) {
            Some(SeriesValue::Rate { hits, total }) if total > 0 => {
                Some(total.saturating_sub(hits) as f64 / total as f64)
            }
            _ => None,
        },
        avg_latency_ms: trend.and_then(|t| t.avg()),
        p50_latency_ms: trend.and_then(|t| t.median()),
        p95_latency_ms: trend.and_then(|t| t.percentile(95.0)),
        p99_latency_ms: trend.and_then(|t| t.percentile(99.0)),
        iterations: counter_total(snap, ITERATIONS),
        dropped_iterations: counter_total(snap, DROPPED_ITERATIONS),
    }
}

fn metric_summaries(snap: &MetricsSnapshot) -> BTreeMap<String, MetricSummary> {
    let mut out = BTreeMap::new();
    for name in snap.names() {
        let Some(value) = snap.metric(name) else {
            continue;
        };

        let mut values = BTreeMap::new();
        match &value {
            SeriesValue::Counter { total, .. } => {
                values.insert("count".to_string(), *total as f64);
                values.insert("rate".to_string(), snap.per_sec(*total));
            }
            SeriesValue::Rate { hits, total } => {
                values.insert("rate".to_string(), value.rate().unwrap_or(0.0));
                values.insert("passes".to_string(), *hits as f64);
                values.insert("fails".to_string(), total.saturating_sub(*hits) as f64);
            }
            SeriesValue::Trend(t) => {
                values.insert("count".to_string(), t.count() as f64);
                let stats = [
                    ("avg", t.avg()),
                    ("min", t.min()),
                    ("med", t.median()),
                    ("max", t.max()),
                ];
                for (key, v) in stats {
                    if let Some(v) = v {
                        values.insert(key.to_string(), v);
                    }
                }
                for (key, p) in TREND_PERCENTILES {
                    if let Some(v) = t.percentile(*p) {
                        values.insert((*key).to_string(), v);
                    }
                }
            }
        }

        out.insert(
            name.to_string(),
            MetricSummary {
                kind: value.kind().to_string(),
                values,
            },
        );
    }
    out
}

pub fn render_json(result: &RunResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&Summary::from_result(result))
}

fn fmt_ms(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}ms")).unwrap_or_else(|| "n/a".to_string())
}

fn fmt_secs(d: Duration) -> String {
    format!("{:.2}s", d.as_secs_f64())
}

/// Fixed-field human summary.
pub fn render_text(result: &RunResult) -> String {
    let summary = Summary::from_result(result);
    let o = &summary.overview;
    let mut out = String::new();

    let _ = writeln!(out, "=== Load Test Summary ===");
    let _ = writeln!(out, "Verdict:            {}", summary.verdict);
    if summary.interrupted {
        let _ = writeln!(out, "Interrupted:        yes");
    }
    let _ = writeln!(out, "Duration:           {}", fmt_secs(result.snapshot.elapsed()));
    let _ = writeln!(out, "Total Requests:     {}", o.total_requests);
    let _ = writeln!(out, "Request Rate:       {:.2} req/s", o.request_rate);
    let _ = writeln!(
        out,
        "Success Rate:       {}",
        o.success_rate
            .map(|r| format!("{:.2}%", r * 100.0))
            .unwrap_or_else(|| "n/a".to_string())
    );
    let _ = writeln!(out, "Avg Latency:        {}", fmt_ms(o.avg_latency_ms));
    let _ = writeln!(out, "P50 Latency:        {}", fmt_ms(o.p50_latency_ms));
    let _ = writeln!(out, "P95 Latency:        {}", fmt_ms(o.p95_latency_ms));
    let _ = writeln!(out, "P99 Latency:        {}", fmt_ms(o.p99_latency_ms));
    let _ = writeln!(out, "Iterations:         {}", o.iterations);
    let _ = writeln!(out, "Dropped Iterations: {}", o.dropped_iterations);

    if !result.scenarios.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Scenarios:");
        for s in &result.scenarios {
            let detail = match (&s.error, s.state) {
                (Some(err), _) => err.clone(),
                (None, ScenarioState::Completed) => fmt_secs(s.elapsed),
                (None, _) => String::new(),
            };
            let _ = writeln!(out, "  {:<24} {:<10} {}", s.name, s.state.as_ref(), detail);
        }
    }

    if !result.thresholds.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Thresholds:");
        for t in &result.thresholds {
            let observed = match (t.observed, &t.note) {
                (Some(v), _) => format!("observed {v:.4}"),
                (None, Some(note)) => note.clone(),
                (None, None) => "no value".to_string(),
            };
            let _ = writeln!(
                out,
                "  {:<13} {}: {} ({observed})",
                t.verdict.as_ref(),
                t.key,
                t.expression
            );
        }
    }

    out
}
