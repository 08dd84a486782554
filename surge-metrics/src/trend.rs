use hdrhistogram::Histogram;

/// Fixed-point scale for values stored in the HDR summary (1/1000 of the recorded unit).
const SUMMARY_SCALE: f64 = 1000.0;
/// Significant digits kept by the HDR summary. Three digits bound relative error to 0.1%.
const SUMMARY_SIGFIG: u8 = 3;

pub const DEFAULT_EXACT_LIMIT: usize = 65_536;

/// How a trend series retains its samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendMode {
    /// Keep every sample; percentiles are exact order statistics.
    Exact,
    /// Keep an HDR histogram only. Percentiles carry at most 0.1% relative error plus
    /// quantization to 1/1000 of the unit; negative values are clamped to zero.
    Summary,
    /// Start exact and switch to the summary once a series holds more than `exact_limit` samples.
    Auto { exact_limit: usize },
}

impl Default for TrendMode {
    fn default() -> Self {
        TrendMode::Auto {
            exact_limit: DEFAULT_EXACT_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
enum Distribution {
    Exact(Vec<f64>),
    Summary(Histogram<u64>),
}

fn new_summary() -> Option<Histogram<u64>> {
    Histogram::<u64>::new(SUMMARY_SIGFIG).ok()
}

fn to_fixed(v: f64) -> u64 {
    if v.is_finite() && v > 0.0 {
        (v * SUMMARY_SCALE).round() as u64
    } else {
        0
    }
}

fn summarize(samples: &[f64]) -> Option<Histogram<u64>> {
    let mut h = new_summary()?;
    for v in samples {
        let _ = h.record(to_fixed(*v));
    }
    Some(h)
}

/// Mutable trend state behind a series mutex.
#[derive(Debug, Clone)]
pub(crate) struct TrendStore {
    mode: TrendMode,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    dist: Distribution,
}

impl TrendStore {
    pub(crate) fn new(mode: TrendMode) -> Self {
        let dist = match mode {
            TrendMode::Summary => match new_summary() {
                Some(h) => Distribution::Summary(h),
                None => Distribution::Exact(Vec::new()),
            },
            TrendMode::Exact | TrendMode::Auto { .. } => Distribution::Exact(Vec::new()),
        };
        Self {
            mode,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            dist,
        }
    }

    pub(crate) fn record(&mut self, v: f64) {
        if !v.is_finite() {
            return;
        }

        self.count += 1;
        self.sum += v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);

        match &mut self.dist {
            Distribution::Exact(samples) => {
                samples.push(v);
                let over_limit = match self.mode {
                    TrendMode::Auto { exact_limit } => samples.len() > exact_limit,
                    TrendMode::Exact | TrendMode::Summary => false,
                };
                if let Some(h) = over_limit.then(|| summarize(samples)).flatten() {
                    self.dist = Distribution::Summary(h);
                }
            }
            Distribution::Summary(h) => {
                let _ = h.record(to_fixed(v));
            }
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn freeze(&self) -> Trend {
        let dist = match &self.dist {
            Distribution::Exact(samples) => {
                let mut sorted = samples.clone();
                sorted.sort_by(f64::total_cmp);
                Distribution::Exact(sorted)
            }
            Distribution::Summary(h) => Distribution::Summary(h.clone()),
        };
        Trend {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
            dist,
        }
    }
}

/// Frozen numeric distribution. Count, sum, min and max are always exact.
#[derive(Debug, Clone)]
pub struct Trend {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    dist: Distribution,
}

impl Trend {
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn is_exact(&self) -> bool {
        matches!(self.dist, Distribution::Exact(_))
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    /// Value at percentile `p` in `[0, 100]`.
    ///
    /// Exact trends interpolate linearly between the closest ranks, so `p = 0` is the minimum and
    /// `p = 100` the maximum.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count == 0 || p.is_nan() {
            return None;
        }
        let p = p.clamp(0.0, 100.0);
        if p == 0.0 {
            return Some(self.min);
        }
        if p == 100.0 {
            return Some(self.max);
        }

        match &self.dist {
            Distribution::Exact(sorted) => {
                let last = sorted.len().checked_sub(1)?;
                let rank = p / 100.0 * last as f64;
                let lo = rank.floor() as usize;
                let hi = rank.ceil() as usize;
                let (a, b) = (*sorted.get(lo)?, *sorted.get(hi)?);
                Some(a + (b - a) * (rank - lo as f64))
            }
            Distribution::Summary(h) => {
                let v = h.value_at_quantile(p / 100.0) as f64 / SUMMARY_SCALE;
                Some(v.clamp(self.min, self.max))
            }
        }
    }

    /// Folds `other` into `self`. Two exact trends stay exact; anything else becomes a summary.
    pub fn merge(&mut self, other: &Trend) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }

        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);

        let merged = match (&mut self.dist, &other.dist) {
            (Distribution::Exact(a), Distribution::Exact(b)) => {
                a.extend_from_slice(b);
                a.sort_by(f64::total_cmp);
                None
            }
            (Distribution::Summary(a), Distribution::Summary(b)) => {
                let _ = a.add(b);
                None
            }
            (Distribution::Summary(a), Distribution::Exact(b)) => {
                for v in b {
                    let _ = a.record(to_fixed(*v));
                }
                None
            }
            (Distribution::Exact(a), Distribution::Summary(b)) => {
                let mut h = b.clone();
                for v in a.iter() {
                    let _ = h.record(to_fixed(*v));
                }
                Some(h)
            }
        };
        if let Some(h) = merged {
            self.dist = Distribution::Summary(h);
        }
    }
}
