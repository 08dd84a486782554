mod arrival_rate;
mod constant_vus;
mod ramping_vus;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ExecutorConfig, ExecutorKind};
use crate::error::Result;
use crate::signal::StopSignal;
use crate::vu::ScenarioRun;

pub use arrival_rate::{DISPATCH_TICK, RampingArrivalRate};
pub use constant_vus::ConstantVus;
pub use ramping_vus::RampingVus;

/// Drives one scenario's iterations until its shape is exhausted or `stop` fires.
#[async_trait]
pub trait Executor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    async fn drive(&self, run: Arc<ScenarioRun>, stop: StopSignal) -> Result<()>;
}

pub fn executor_for(config: &ExecutorConfig) -> Box<dyn Executor> {
    match config {
        ExecutorConfig::ConstantVus {
            vus,
            duration,
            iterations,
        } => Box::new(ConstantVus::new(*vus, *duration, *iterations)),
        ExecutorConfig::RampingVus { start_vus, stages } => {
            Box::new(RampingVus::new(*start_vus, stages.clone()))
        }
        ExecutorConfig::RampingArrivalRate {
            start_rate,
            time_unit,
            pre_allocated_vus,
            max_vus,
            idle_timeout,
            stages,
        } => Box::new(RampingArrivalRate::new(
            *start_rate,
            *time_unit,
            *pre_allocated_vus,
            *max_vus,
            *idle_timeout,
            stages.clone(),
        )),
    }
}

/// Keeps VU `vu` alive: a loop that panics is replaced with the same id while
/// `keep_going` still holds.
pub(crate) async fn supervise<F, Fut>(
    run: Arc<ScenarioRun>,
    vu: u64,
    keep_going: impl Fn() -> bool + Send,
    vu_loop: F,
) where
    F: Fn() -> Fut + Send,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        match tokio::spawn(vu_loop()).await {
            Ok(()) => return,
            Err(err) if err.is_panic() && keep_going() => {
                tracing::warn!(scenario = %run.name(), vu, "virtual user panicked; replacing it");
            }
            Err(err) => {
                if err.is_panic() {
                    tracing::warn!(scenario = %run.name(), vu, "virtual user panicked after the scenario ended");
                }
                return;
            }
        }
    }
}
