pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("no scenarios configured")]
    NoScenarios,

    #[error("scenario name must not be empty")]
    EmptyScenarioName,

    #[error("duplicate scenario name `{0}`")]
    DuplicateScenario(String),

    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("`iterations` must be a positive integer")]
    InvalidIterations,

    #[error("`duration` must be a positive duration")]
    InvalidDuration,

    #[error(
        "invalid `executor` `{0}` (expected `constant-vus`, `ramping-vus`, or `ramping-arrival-rate`)"
    )]
    InvalidExecutor(String),

    #[error("`stages` must be a non-empty array of {{ duration, target }} with a positive total duration")]
    InvalidStages,

    #[error("`time_unit` must be a positive duration")]
    InvalidTimeUnit,

    #[error("`pre_allocated_vus` must be a positive integer")]
    InvalidPreAllocatedVus,

    #[error("`max_vus` must be >= `pre_allocated_vus`")]
    InvalidMaxVus,

    #[error("`idle_timeout` must be a positive duration")]
    InvalidIdleTimeout,

    #[error("unknown workload `{0}`")]
    UnknownWorkload(String),

    #[error("invalid threshold for `{metric}`: {reason}")]
    InvalidThreshold { metric: String, reason: String },

    #[error("run aborted before start")]
    AbortedBeforeStart,

    #[error("executor failed: {0}")]
    Executor(String),

    #[error(transparent)]
    Metrics(#[from] surge_metrics::Error),
}

impl Error {
    /// Configuration problems detected before any workload starts.
    #[must_use]
    pub fn is_config(&self) -> bool {
        !matches!(
            self,
            Self::AbortedBeforeStart | Self::Executor(_) | Self::Metrics(_)
        )
    }
}
