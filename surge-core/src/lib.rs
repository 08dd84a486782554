mod collector;
mod config;
mod error;
mod executor;
mod gate;
mod outcome;
mod pool;
mod progress;
mod schedule;
mod signal;
mod thresholds;
mod thresholds_eval;
mod vu;
mod workload;

pub mod report;
pub mod run;

pub use collector::{
    CHECKS, DROPPED_ITERATIONS, ERRORS, HTTP_REQ_DURATION, HTTP_REQ_ERRORS, HTTP_REQS,
    ITERATION_DURATION, ITERATIONS, ScenarioMetrics, builtin_kind,
};
pub use config::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_TIME_UNIT, ExecutorConfig, ExecutorKind, ScenarioConfig,
    ScenarioOptions, Stage, scenario_from_options,
};
pub use error::{Error, Result};
pub use executor::{
    ConstantVus, DISPATCH_TICK, Executor, RampingArrivalRate, RampingVus, executor_for,
};
pub use gate::IterationGate;
pub use outcome::{IterationOutcome, OutcomeErrorKind, RequestOutcome};
pub use pool::{Admission, RateAccumulator, WorkerPool};
pub use progress::{ProgressFn, ProgressUpdate, StageProgress};
pub use run::{
    PlannedScenario, RunOptions, RunPlan, RunResult, ScenarioResult, ScenarioState, run,
};
pub use schedule::{RampingSchedule, StageSnapshot};
pub use signal::StopSignal;
pub use thresholds::{
    Threshold, ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdSet, parse_metric_key,
    parse_threshold_expr, parse_thresholds,
};
pub use thresholds_eval::{ThresholdOutcome, Verdict, evaluate_thresholds, overall_verdict};
pub use vu::{ActiveGuard, RequestDefaults, ScenarioRun};
pub use workload::{Checks, IterationInfo, Workload, Workloads};

pub use surge_http::{HttpRequest, HttpResponse, Method};
pub use surge_metrics::{MetricKind, MetricsSnapshot, Observation, SeriesValue, TrendMode};
