use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::snapshot::SeriesValue;
use crate::trend::{TrendMode, TrendStore};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

/// One value fed into a series. The variant must match the series kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    Add(u64),
    Bool(bool),
    Value(f64),
}

impl Observation {
    pub fn kind(&self) -> MetricKind {
        match self {
            Observation::Add(_) => MetricKind::Counter,
            Observation::Bool(_) => MetricKind::Rate,
            Observation::Value(_) => MetricKind::Trend,
        }
    }
}

#[derive(Debug, Default)]
pub struct CounterCell {
    total: AtomicU64,
    samples: AtomicU64,
}

#[derive(Debug, Default)]
pub struct RateCell {
    hits: AtomicU64,
    total: AtomicU64,
}

#[derive(Debug)]
pub struct TrendCell {
    store: Mutex<TrendStore>,
}

/// Write handle to one series. Cloning is cheap and shares the underlying storage.
///
/// Writes go through [`crate::WriteGroup`] so snapshots never see half of a correlated update.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<CounterCell>),
    Rate(Arc<RateCell>),
    Trend(Arc<TrendCell>),
}

impl MetricHandle {
    pub(crate) fn new(kind: MetricKind, mode: TrendMode) -> Self {
        match kind {
            MetricKind::Counter => MetricHandle::Counter(Arc::default()),
            MetricKind::Rate => MetricHandle::Rate(Arc::default()),
            MetricKind::Trend => MetricHandle::Trend(Arc::new(TrendCell {
                store: Mutex::new(TrendStore::new(mode)),
            })),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricHandle::Counter(_) => MetricKind::Counter,
            MetricHandle::Rate(_) => MetricKind::Rate,
            MetricHandle::Trend(_) => MetricKind::Trend,
        }
    }

    /// Applies `obs`; observations of the wrong kind for this handle are ignored.
    #[inline]
    pub(crate) fn apply(&self, obs: Observation) {
        match (self, obs) {
            (MetricHandle::Counter(c), Observation::Add(v)) => {
                c.total.fetch_add(v, Ordering::Relaxed);
                c.samples.fetch_add(1, Ordering::Relaxed);
            }
            (MetricHandle::Rate(r), Observation::Bool(hit)) => {
                if hit {
                    r.hits.fetch_add(1, Ordering::Relaxed);
                }
                r.total.fetch_add(1, Ordering::Relaxed);
            }
            (MetricHandle::Trend(t), Observation::Value(v)) => t.store.lock().record(v),
            _ => {}
        }
    }

    /// Live counter total. Zero for other kinds.
    pub fn counter_total(&self) -> u64 {
        match self {
            MetricHandle::Counter(c) => c.total.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// Live `(hits, total)` for rates. Zero for other kinds.
    pub fn rate_counts(&self) -> (u64, u64) {
        match self {
            MetricHandle::Rate(r) => (r.hits.load(Ordering::Relaxed), r.total.load(Ordering::Relaxed)),
            _ => (0, 0),
        }
    }

    pub(crate) fn observations(&self) -> u64 {
        match self {
            MetricHandle::Counter(c) => c.samples.load(Ordering::Relaxed),
            MetricHandle::Rate(r) => r.total.load(Ordering::Relaxed),
            MetricHandle::Trend(t) => t.store.lock().count(),
        }
    }

    pub(crate) fn freeze(&self) -> SeriesValue {
        match self {
            MetricHandle::Counter(c) => SeriesValue::Counter {
                total: c.total.load(Ordering::Relaxed),
                samples: c.samples.load(Ordering::Relaxed),
            },
            MetricHandle::Rate(r) => SeriesValue::Rate {
                hits: r.hits.load(Ordering::Relaxed),
                total: r.total.load(Ordering::Relaxed),
            },
            MetricHandle::Trend(t) => SeriesValue::Trend(t.store.lock().freeze()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(MetricKind::Trend.to_string(), "trend");
        assert_eq!("rate".parse::<MetricKind>().ok(), Some(MetricKind::Rate));
        assert!("gauge".parse::<MetricKind>().is_err());
    }

    #[test]
    fn counter_tracks_total_and_samples() {
        let c = MetricHandle::new(MetricKind::Counter, TrendMode::Exact);
        c.apply(Observation::Add(2));
        c.apply(Observation::Add(0));
        c.apply(Observation::Bool(true));
        assert_eq!(c.counter_total(), 2);
        assert_eq!(c.observations(), 2);
    }

    #[test]
    fn rate_counts_hits() {
        let r = MetricHandle::new(MetricKind::Rate, TrendMode::Exact);
        r.apply(Observation::Bool(true));
        r.apply(Observation::Bool(false));
        r.apply(Observation::Bool(true));
        assert_eq!(r.rate_counts(), (2, 3));
    }

    #[test]
    fn trend_freezes_recorded_values() {
        let t = MetricHandle::new(MetricKind::Trend, TrendMode::Exact);
        t.apply(Observation::Value(10.0));
        t.apply(Observation::Value(30.0));
        let SeriesValue::Trend(frozen) = t.freeze() else {
            panic!("expected trend");
        };
        assert_eq!(frozen.avg(), Some(20.0));
    }
}
