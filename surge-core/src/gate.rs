use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared admission for constant-VU loops: a deadline and an optional iteration budget.
#[derive(Debug)]
pub struct IterationGate {
    claimed: AtomicU64,
    iterations: Option<u64>,
    deadline: Option<Instant>,
}

impl IterationGate {
    pub fn new(started: Instant, iterations: Option<u64>, duration: Option<Duration>) -> Self {
        Self {
            claimed: AtomicU64::new(0),
            iterations,
            deadline: duration.map(|d| started + d),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Claims the next iteration; `false` once the deadline passed or the budget is spent.
    pub fn next(&self) -> bool {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return false;
        }

        match self.iterations {
            Some(total) => self.claimed.fetch_add(1, Ordering::Relaxed) < total,
            None => true,
        }
    }

    /// True once no further iteration can be admitted.
    pub fn is_done(&self) -> bool {
        let spent = self
            .iterations
            .is_some_and(|total| self.claimed.load(Ordering::Relaxed) >= total);
        spent || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}
