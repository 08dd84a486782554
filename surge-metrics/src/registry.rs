use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard};

use crate::error::{Error, Result};
use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind, Observation};
use crate::snapshot::{MetricsSnapshot, SeriesSnapshot};
use crate::tags::TagSet;
use crate::trend::TrendMode;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: KeyId,
    tags: TagSet,
}

/// The run-wide metric store.
///
/// Series live in a sharded map and synchronize independently (atomics for counters and rates,
/// a mutex per trend). A single gate separates writers from snapshots: every write happens inside
/// a [`WriteGroup`] holding the shared side, snapshots take the exclusive side.
#[derive(Debug)]
pub struct Registry {
    interner: Interner,
    kinds: DashMap<KeyId, MetricKind>,
    series: DashMap<SeriesKey, MetricHandle>,
    gate: RwLock<()>,
    frozen: AtomicBool,
    frozen_elapsed: OnceLock<Duration>,
    started: Instant,
    trend_mode: TrendMode,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(TrendMode::default())
    }
}

impl Registry {
    pub fn new(trend_mode: TrendMode) -> Self {
        Self {
            interner: Interner::new(),
            kinds: DashMap::new(),
            series: DashMap::new(),
            gate: RwLock::new(()),
            frozen: AtomicBool::new(false),
            frozen_elapsed: OnceLock::new(),
            started: Instant::now(),
            trend_mode,
        }
    }

    pub fn trend_mode(&self) -> TrendMode {
        self.trend_mode
    }

    /// Returns the handle for `(name, tags)`, creating the series on first use.
    pub fn handle(&self, name: &str, kind: MetricKind, tags: &[(&str, &str)]) -> Result<MetricHandle> {
        let name_id = self.interner.get_or_intern(name);

        let registered = *self.kinds.entry(name_id).or_insert(kind);
        if registered != kind {
            return Err(Error::KindMismatch {
                name: name.to_string(),
                registered,
                requested: kind,
            });
        }

        let key = SeriesKey {
            name: name_id,
            tags: TagSet::resolve(&self.interner, tags),
        };
        if let Some(existing) = self.series.get(&key) {
            return Ok(existing.clone());
        }

        let handle = self
            .series
            .entry(key)
            .or_insert_with(|| MetricHandle::new(kind, self.trend_mode))
            .clone();
        Ok(handle)
    }

    /// Kind a metric name was first registered with.
    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        let id = self.interner.get(name)?;
        self.kinds.get(&id).map(|k| *k)
    }

    /// Opens a group of writes that a snapshot observes entirely or not at all.
    ///
    /// Groups never exclude each other. Do not hold one across an `.await`.
    pub fn write_group(&self) -> Result<WriteGroup<'_>> {
        let guard = self.gate.read();
        if self.frozen.load(Ordering::Acquire) {
            return Err(Error::Frozen);
        }
        Ok(WriteGroup { _guard: guard })
    }

    /// One-off observation; resolves the series and records inside its own group.
    pub fn observe(&self, name: &str, tags: &[(&str, &str)], obs: Observation) -> Result<()> {
        let handle = self.handle(name, obs.kind(), tags)?;
        self.write_group()?.observe(&handle, obs);
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Time since the registry was created, or until it was frozen.
    pub fn elapsed(&self) -> Duration {
        self.frozen_elapsed
            .get()
            .copied()
            .unwrap_or_else(|| self.started.elapsed())
    }

    /// Consistent intermediate snapshot. Writers keep going afterwards.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let _exclusive = self.gate.write();
        self.collect(self.elapsed())
    }

    /// Stops accepting writes and returns the final snapshot.
    pub fn freeze(&self) -> MetricsSnapshot {
        let _exclusive = self.gate.write();
        self.frozen.store(true, Ordering::Release);
        let elapsed = *self.frozen_elapsed.get_or_init(|| self.started.elapsed());
        self.collect(elapsed)
    }

    fn collect(&self, elapsed: Duration) -> MetricsSnapshot {
        let series = self
            .series
            .iter()
            .filter(|entry| entry.value().observations() > 0)
            .map(|entry| {
                let key = entry.key();
                let handle = entry.value();
                SeriesSnapshot {
                    name: self
                        .interner
                        .resolve(key.name)
                        .map(|s| s.to_string())
                        .unwrap_or_default(),
                    kind: handle.kind(),
                    tags: key.tags.to_strings(&self.interner),
                    value: handle.freeze(),
                }
            })
            .collect();
        MetricsSnapshot::new(elapsed, series)
    }
}

/// Shared-side guard over the registry gate; see [`Registry::write_group`].
pub struct WriteGroup<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

impl WriteGroup<'_> {
    #[inline]
    pub fn observe(&self, handle: &MetricHandle, obs: Observation) {
        handle.apply(obs);
    }

    #[inline]
    pub fn add(&self, handle: &MetricHandle, v: u64) {
        handle.apply(Observation::Add(v));
    }

    #[inline]
    pub fn hit(&self, handle: &MetricHandle, hit: bool) {
        handle.apply(Observation::Bool(hit));
    }

    #[inline]
    pub fn record(&self, handle: &MetricHandle, v: f64) {
        handle.apply(Observation::Value(v));
    }
}
