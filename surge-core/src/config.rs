use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

pub const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Validated executor parameters of one scenario.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorConfig {
    /// A fixed number of VU loops for `duration`, optionally sharing an iteration budget.
    ConstantVus {
        vus: u64,
        duration: Option<Duration>,
        iterations: Option<u64>,
    },

    /// Ramp the number of active VUs up/down over time.
    RampingVus { start_vus: u64, stages: Vec<Stage> },

    /// Open-model arrival rate (iterations started per `time_unit`), with ramping stages.
    RampingArrivalRate {
        start_rate: u64,
        time_unit: Duration,
        pre_allocated_vus: u64,
        max_vus: u64,
        /// Idle time after which a worker above `pre_allocated_vus` is retired.
        idle_timeout: Duration,
        stages: Vec<Stage>,
    },
}

impl ExecutorConfig {
    pub fn kind(&self) -> ExecutorKind {
        match self {
            Self::ConstantVus { .. } => ExecutorKind::ConstantVus,
            Self::RampingVus { .. } => ExecutorKind::RampingVus,
            Self::RampingArrivalRate { .. } => ExecutorKind::RampingArrivalRate,
        }
    }

    /// Upper bound of concurrently running VUs.
    pub fn max_vus(&self) -> u64 {
        match self {
            Self::ConstantVus { vus, .. } => *vus,
            Self::RampingVus { start_vus, stages } => {
                let max_stage = stages.iter().map(|st| st.target).max().unwrap_or(0);
                max_stage.max(*start_vus)
            }
            Self::RampingArrivalRate { max_vus, .. } => *max_vus,
        }
    }

    /// Scheduled run time, when known up front.
    pub fn planned_duration(&self) -> Option<Duration> {
        match self {
            Self::ConstantVus { duration, .. } => *duration,
            Self::RampingVus { stages, .. } | Self::RampingArrivalRate { stages, .. } => {
                Some(total_duration(stages))
            }
        }
    }
}

pub(crate) fn total_duration(stages: &[Stage]) -> Duration {
    stages
        .iter()
        .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration))
}

/// Executor kind (the string form used by scenario files).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display, strum::AsRefStr,
)]
pub enum ExecutorKind {
    #[strum(to_string = "constant-vus", serialize = "constant")]
    ConstantVus,

    #[strum(to_string = "ramping-vus")]
    RampingVus,

    #[strum(to_string = "ramping-arrival-rate", serialize = "ramping-rps")]
    RampingArrivalRate,
}

/// Raw, unvalidated scenario descriptor as read from a scenario file.
#[derive(Debug, Clone, Default)]
pub struct ScenarioOptions {
    pub name: String,

    /// Workload the scenario's iterations run. Defaults to the scenario name.
    pub exec: Option<String>,

    /// Extra metric tags attached to every series the scenario writes.
    pub tags: Vec<(String, String)>,

    /// Executor name. If missing, defaults to constant VUs.
    pub executor: Option<String>,

    pub start_time: Option<Duration>,
    pub think_time: Option<Duration>,

    pub vus: Option<u64>,
    pub iterations: Option<u64>,
    pub duration: Option<Duration>,

    // Ramping VUs
    pub start_vus: Option<u64>,
    pub stages: Vec<Stage>,

    // Ramping arrival rate
    pub start_rate: Option<u64>,
    pub time_unit: Option<Duration>,
    pub pre_allocated_vus: Option<u64>,
    pub max_vus: Option<u64>,
    pub idle_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    pub name: String,
    pub exec: String,
    pub executor: ExecutorConfig,
    /// Offset from the run start.
    pub start_time: Duration,
    /// Pause after every iteration.
    pub think_time: Duration,
    pub tags: Vec<(String, String)>,
}

/// Validates one scenario descriptor. Errors here fail only this scenario.
pub fn scenario_from_options(s: ScenarioOptions) -> Result<ScenarioConfig> {
    let executor_name = s.executor.as_deref().unwrap_or("constant-vus");
    let executor_kind: ExecutorKind = executor_name
        .parse()
        .map_err(|_| Error::InvalidExecutor(executor_name.to_string()))?;

    let executor = match executor_kind {
        ExecutorKind::ConstantVus => {
            let vus = s.vus.unwrap_or(1);
            if vus == 0 {
                return Err(Error::InvalidVus);
            }
            if s.iterations == Some(0) {
                return Err(Error::InvalidIterations);
            }
            match s.duration {
                Some(d) if d.is_zero() => return Err(Error::InvalidDuration),
                None if s.iterations.is_none() => return Err(Error::InvalidDuration),
                _ => {}
            }

            ExecutorConfig::ConstantVus {
                vus,
                duration: s.duration,
                iterations: s.iterations,
            }
        }
        ExecutorKind::RampingVus => {
            if s.iterations.is_some() {
                return Err(Error::InvalidIterations);
            }
            validate_stages(&s.stages)?;

            let start_vus = s.start_vus.unwrap_or(0);
            let max_stage = s.stages.iter().map(|st| st.target).max().unwrap_or(0);
            if max_stage.max(start_vus) == 0 {
                return Err(Error::InvalidVus);
            }

            ExecutorConfig::RampingVus {
                start_vus,
                stages: s.stages,
            }
        }
        ExecutorKind::RampingArrivalRate => {
            if s.iterations.is_some() {
                return Err(Error::InvalidIterations);
            }
            validate_stages(&s.stages)?;

            let time_unit = s.time_unit.unwrap_or(DEFAULT_TIME_UNIT);
            if time_unit.is_zero() {
                return Err(Error::InvalidTimeUnit);
            }

            let pre_allocated_vus = s.pre_allocated_vus.unwrap_or(1);
            if pre_allocated_vus == 0 {
                return Err(Error::InvalidPreAllocatedVus);
            }

            let max_vus = s.max_vus.unwrap_or(pre_allocated_vus);
            if max_vus < pre_allocated_vus {
                return Err(Error::InvalidMaxVus);
            }

            let idle_timeout = s.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT);
            if idle_timeout.is_zero() {
                return Err(Error::InvalidIdleTimeout);
            }

            ExecutorConfig::RampingArrivalRate {
                start_rate: s.start_rate.unwrap_or(0),
                time_unit,
                pre_allocated_vus,
                max_vus,
                idle_timeout,
                stages: s.stages,
            }
        }
    };

    let exec = s.exec.unwrap_or_else(|| s.name.clone());
    Ok(ScenarioConfig {
        name: s.name,
        exec,
        executor,
        start_time: s.start_time.unwrap_or(Duration::ZERO),
        think_time: s.think_time.unwrap_or(Duration::ZERO),
        tags: s.tags,
    })
}

fn validate_stages(stages: &[Stage]) -> Result<()> {
    if stages.is_empty() || total_duration(stages).is_zero() {
        return Err(Error::InvalidStages);
    }
    Ok(())
}
