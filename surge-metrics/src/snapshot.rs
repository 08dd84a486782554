use std::collections::BTreeSet;
use std::time::Duration;

use crate::metrics::MetricKind;
use crate::trend::Trend;

/// Frozen value of one series (or of several merged series of the same metric).
#[derive(Debug, Clone)]
pub enum SeriesValue {
    Counter { total: u64, samples: u64 },
    Rate { hits: u64, total: u64 },
    Trend(Trend),
}

impl SeriesValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            SeriesValue::Counter { .. } => MetricKind::Counter,
            SeriesValue::Rate { .. } => MetricKind::Rate,
            SeriesValue::Trend(_) => MetricKind::Trend,
        }
    }

    /// Number of observations folded into this value.
    pub fn observations(&self) -> u64 {
        match self {
            SeriesValue::Counter { samples, .. } => *samples,
            SeriesValue::Rate { total, .. } => *total,
            SeriesValue::Trend(t) => t.count(),
        }
    }

    /// Fraction of true observations for rates.
    pub fn rate(&self) -> Option<f64> {
        match self {
            SeriesValue::Rate { hits, total } if *total > 0 => Some(*hits as f64 / *total as f64),
            _ => None,
        }
    }

    pub fn counter_total(&self) -> Option<u64> {
        match self {
            SeriesValue::Counter { total, .. } => Some(*total),
            _ => None,
        }
    }

    pub fn trend(&self) -> Option<&Trend> {
        match self {
            SeriesValue::Trend(t) => Some(t),
            _ => None,
        }
    }

    /// Returns `false` (leaving `self` untouched) when the kinds differ.
    pub fn merge(&mut self, other: &SeriesValue) -> bool {
        match (self, other) {
            (
                SeriesValue::Counter { total, samples },
                SeriesValue::Counter {
                    total: t2,
                    samples: s2,
                },
            ) => {
                *total += t2;
                *samples += s2;
            }
            (SeriesValue::Rate { hits, total }, SeriesValue::Rate { hits: h2, total: t2 }) => {
                *hits += h2;
                *total += t2;
            }
            (SeriesValue::Trend(a), SeriesValue::Trend(b)) => a.merge(b),
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub name: String,
    pub kind: MetricKind,
    /// Sorted by key.
    pub tags: Vec<(String, String)>,
    pub value: SeriesValue,
}

impl SeriesSnapshot {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True when every `(key, value)` pair of `selector` is present on this series.
    pub fn matches(&self, selector: &[(String, String)]) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.tag(k).is_some_and(|have| have == v))
    }
}

/// Immutable view of every observed series at one instant.
///
/// Series that never received an observation are not part of a snapshot.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    elapsed: Duration,
    series: Vec<SeriesSnapshot>,
}

impl MetricsSnapshot {
    pub fn new(elapsed: Duration, mut series: Vec<SeriesSnapshot>) -> Self {
        series.retain(|s| s.value.observations() > 0);
        series.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        Self { elapsed, series }
    }

    /// Run time covered by the snapshot; the denominator of per-second rates.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn series(&self) -> &[SeriesSnapshot] {
        &self.series
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.series.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        self.series.iter().find(|s| s.name == name).map(|s| s.kind)
    }

    /// Every series of `name` merged into one value.
    pub fn metric(&self, name: &str) -> Option<SeriesValue> {
        self.aggregate(name, &[])
    }

    /// Series of `name` carrying all tags in `selector`, merged into one value.
    pub fn aggregate(&self, name: &str, selector: &[(String, String)]) -> Option<SeriesValue> {
        let mut out: Option<SeriesValue> = None;
        for s in self
            .series
            .iter()
            .filter(|s| s.name == name && s.matches(selector))
        {
            match out.as_mut() {
                Some(acc) => {
                    acc.merge(&s.value);
                }
                None => out = Some(s.value.clone()),
            }
        }
        out
    }

    /// `count` spread over the snapshot's elapsed time.
    pub fn per_sec(&self, count: u64) -> f64 {
        per_sec(count, self.elapsed)
    }
}

#[inline]
pub fn per_sec(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    count as f64 / secs
}
