//! Bookkeeping for the arrival-rate worker pool.
//!
//! Everything here is owned by the dispatch loop and is plain data: workers never touch it,
//! they only report back that they went idle.

use std::time::{Duration, Instant};

/// How an iteration that is due gets placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Hand it to this idle worker.
    Idle(u64),
    /// Spawn a new worker with this id for it.
    Spawn(u64),
    /// The pool is at `max` and everyone is busy.
    Drop,
}

#[derive(Debug)]
pub struct WorkerPool {
    min: u64,
    max: u64,
    size: u64,
    next_id: u64,
    /// Most recently idle last.
    idle: Vec<(u64, Instant)>,
}

impl WorkerPool {
    /// A pool whose first `min` workers (ids `1..=min`) start idle.
    pub fn new(min: u64, max: u64, now: Instant) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            size: min,
            next_id: min + 1,
            idle: (1..=min).rev().map(|id| (id, now)).collect(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Places one due iteration. The most recently idle worker is preferred.
    pub fn admit(&mut self) -> Admission {
        if let Some((id, _)) = self.idle.pop() {
            return Admission::Idle(id);
        }
        if self.size < self.max {
            let id = self.next_id;
            self.next_id += 1;
            self.size += 1;
            return Admission::Spawn(id);
        }
        Admission::Drop
    }

    pub fn mark_idle(&mut self, id: u64, now: Instant) {
        if !self.idle.iter().any(|(i, _)| *i == id) {
            self.idle.push((id, now));
        }
    }

    /// Retires workers idle for at least `timeout`, oldest first, down to `min`.
    pub fn retire_idle(&mut self, now: Instant, timeout: Duration) -> Vec<u64> {
        let mut retired = Vec::new();
        while self.size > self.min {
            let Some(&(id, since)) = self.idle.first() else {
                break;
            };
            if now.saturating_duration_since(since) < timeout {
                break;
            }
            self.idle.remove(0);
            self.size -= 1;
            retired.push(id);
        }
        retired
    }

    /// Removes a worker that went away on its own.
    pub fn forget(&mut self, id: u64) {
        self.idle.retain(|(i, _)| *i != id);
        self.size = self.size.saturating_sub(1);
    }
}

/// Turns a continuous rate into whole iterations per tick, carrying the fraction over.
#[derive(Debug, Default, Clone)]
pub struct RateAccumulator {
    carry: f64,
}

impl RateAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `rate * dt / time_unit` and returns the whole iterations now due.
    pub fn advance(&mut self, rate: f64, dt: Duration, time_unit: Duration) -> u64 {
        let unit = time_unit.as_secs_f64().max(1e-9);
        self.carry += rate.max(0.0) * (dt.as_secs_f64() / unit);
        let due = self.carry.floor();
        self.carry -= due;
        due as u64
    }

    pub fn carry(&self) -> f64 {
        self.carry
    }
}
