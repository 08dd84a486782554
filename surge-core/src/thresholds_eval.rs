use serde::Serialize;
use surge_metrics::{MetricsSnapshot, SeriesValue};

use crate::thresholds::{Threshold, ThresholdAgg};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
    Undetermined,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdOutcome {
    pub key: String,
    pub expression: String,
    pub verdict: Verdict,
    pub observed: Option<f64>,
    pub note: Option<String>,
}

/// Evaluates every threshold independently against a frozen snapshot.
pub fn evaluate_thresholds(
    snapshot: &MetricsSnapshot,
    thresholds: &[Threshold],
) -> Vec<ThresholdOutcome> {
    thresholds.iter().map(|t| evaluate_one(snapshot, t)).collect()
}

fn evaluate_one(snapshot: &MetricsSnapshot, t: &Threshold) -> ThresholdOutcome {
    let outcome = |verdict, observed, note: Option<&str>| ThresholdOutcome {
        key: t.key.clone(),
        expression: t.expression.clone(),
        verdict,
        observed,
        note: note.map(str::to_string),
    };

    let Some(value) = snapshot
        .aggregate(&t.metric, &t.selector)
        .filter(|v| v.observations() > 0)
    else {
        return outcome(Verdict::Undetermined, None, Some("no observations"));
    };

    if !t.expr.agg.applies_to(value.kind()) {
        return outcome(
            Verdict::Fail,
            None,
            Some("aggregation does not apply to metric type"),
        );
    }

    let Some(observed) = observed_value(snapshot, &value, t.expr.agg) else {
        return outcome(Verdict::Undetermined, None, Some("no observations"));
    };

    let verdict = if t.expr.op.compare(observed, t.expr.value) {
        Verdict::Pass
    } else {
        Verdict::Fail
    };
    outcome(verdict, Some(observed), None)
}

fn observed_value(snapshot: &MetricsSnapshot, value: &SeriesValue, agg: ThresholdAgg) -> Option<f64> {
    match (value, agg) {
        (SeriesValue::Counter { total, .. }, ThresholdAgg::Count) => Some(*total as f64),
        // Counter rate is throughput over the run.
        (SeriesValue::Counter { total, .. }, ThresholdAgg::Rate) => Some(snapshot.per_sec(*total)),

        (SeriesValue::Rate { .. }, ThresholdAgg::Rate) => value.rate(),

        (SeriesValue::Trend(t), ThresholdAgg::Count) => Some(t.count() as f64),
        (SeriesValue::Trend(t), ThresholdAgg::Avg) => t.avg(),
        (SeriesValue::Trend(t), ThresholdAgg::Min) => t.min(),
        (SeriesValue::Trend(t), ThresholdAgg::Max) => t.max(),
        (SeriesValue::Trend(t), ThresholdAgg::Med) => t.median(),
        (SeriesValue::Trend(t), ThresholdAgg::P(p)) => t.percentile(p),

        _ => None,
    }
}

/// Run verdict: any failure wins, then any undetermined threshold, else pass.
pub fn overall_verdict(outcomes: &[ThresholdOutcome], all_scenarios_completed: bool) -> Verdict {
    if !all_scenarios_completed || outcomes.iter().any(|o| o.verdict == Verdict::Fail) {
        return Verdict::Fail;
    }
    if outcomes.iter().any(|o| o.verdict == Verdict::Undetermined) {
        return Verdict::Undetermined;
    }
    Verdict::Pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::{ThresholdSet, parse_thresholds};
    use surge_metrics::{Observation, Registry, TrendMode};

    fn thresholds(metric: &str, exprs: &[&str]) -> Vec<Threshold> {
        parse_thresholds(&[ThresholdSet {
            metric: metric.to_string(),
            expressions: exprs.iter().map(|s| s.to_string()).collect(),
        }])
        .unwrap_or_else(|e| panic!("{e}"))
    }

    fn errors_snapshot(failures: u64, total: u64) -> MetricsSnapshot {
        let reg = Registry::default();
        for i in 0..total {
            reg.observe("errors", &[("scenario", "load")], Observation::Bool(i < failures))
                .unwrap_or_else(|e| panic!("{e}"));
        }
        reg.freeze()
    }

    #[test]
    fn error_rate_threshold_passes_and_fails() {
        let t = thresholds("errors", &["rate<0.01"]);

        let pass = evaluate_thresholds(&errors_snapshot(2, 300), &t);
        assert_eq!(pass[0].verdict, Verdict::Pass);
        assert_eq!(pass[0].observed, Some(2.0 / 300.0));

        let fail = evaluate_thresholds(&errors_snapshot(5, 300), &t);
        assert_eq!(fail[0].verdict, Verdict::Fail);
        assert_eq!(overall_verdict(&fail, true), Verdict::Fail);
    }

    #[test]
    fn missing_metric_is_undetermined() {
        let t = thresholds("http_req_duration", &["p(95)<500"]);
        let out = evaluate_thresholds(&errors_snapshot(0, 10), &t);
        assert_eq!(out[0].verdict, Verdict::Undetermined);
        assert_eq!(out[0].observed, None);
        assert_eq!(overall_verdict(&out, true), Verdict::Undetermined);
        assert_eq!(overall_verdict(&out, false), Verdict::Fail);
    }

    #[test]
    fn selector_filters_series() {
        let reg = Registry::new(TrendMode::Exact);
        for v in [10.0, 20.0, 30.0] {
            reg.observe("http_req_duration", &[("scenario", "a")], Observation::Value(v))
                .unwrap_or_else(|e| panic!("{e}"));
        }
        reg.observe("http_req_duration", &[("scenario", "b")], Observation::Value(1000.0))
            .unwrap_or_else(|e| panic!("{e}"));
        let snap = reg.freeze();

        let scoped = thresholds("http_req_duration{scenario:a}", &["max<=30", "med==20"]);
        let out = evaluate_thresholds(&snap, &scoped);
        assert!(out.iter().all(|o| o.verdict == Verdict::Pass), "{out:?}");

        let global = thresholds("http_req_duration", &["max<=30"]);
        assert_eq!(evaluate_thresholds(&snap, &global)[0].verdict, Verdict::Fail);

        let none = thresholds("http_req_duration{scenario:c}", &["max<=30"]);
        assert_eq!(evaluate_thresholds(&snap, &none)[0].verdict, Verdict::Undetermined);
    }

    #[test]
    fn inapplicable_aggregation_on_custom_metric_fails() {
        let reg = Registry::default();
        reg.observe("event_latency", &[], Observation::Value(5.0))
            .unwrap_or_else(|e| panic!("{e}"));
        let out = evaluate_thresholds(&reg.freeze(), &thresholds("event_latency", &["rate<1"]));
        assert_eq!(out[0].verdict, Verdict::Fail);
        assert_eq!(out[0].observed, None);
        assert!(out[0].note.is_some());
    }

    #[test]
    fn no_thresholds_pass() {
        assert_eq!(overall_verdict(&[], true), Verdict::Pass);
    }
}
