use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;

use super::{Executor, supervise};
use crate::config::ExecutorKind;
use crate::error::{Error, Result};
use crate::gate::IterationGate;
use crate::signal::StopSignal;
use crate::vu::ScenarioRun;

/// Exactly `vus` loops for `duration`, optionally sharing an iteration budget.
#[derive(Debug, Clone)]
pub struct ConstantVus {
    vus: u64,
    duration: Option<Duration>,
    iterations: Option<u64>,
}

impl ConstantVus {
    pub fn new(vus: u64, duration: Option<Duration>, iterations: Option<u64>) -> Self {
        Self {
            vus,
            duration,
            iterations,
        }
    }
}

#[async_trait]
impl Executor for ConstantVus {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::ConstantVus
    }

    async fn drive(&self, run: Arc<ScenarioRun>, stop: StopSignal) -> Result<()> {
        let started = run.mark_started();
        let gate = Arc::new(IterationGate::new(started, self.iterations, self.duration));
        run.set_pool_vus(self.vus);

        let mut vus = JoinSet::new();
        for vu in 1..=self.vus {
            let keep_going = {
                let (stop, gate) = (stop.clone(), gate.clone());
                move || !stop.is_stopped() && !gate.is_done()
            };
            let spawn_loop = {
                let (run, stop, gate) = (run.clone(), stop.clone(), gate.clone());
                move || vu_loop(vu, run.clone(), stop.clone(), gate.clone())
            };
            vus.spawn(supervise(run.clone(), vu, keep_going, spawn_loop));
        }

        while let Some(res) = vus.join_next().await {
            res.map_err(|e| Error::Executor(e.to_string()))?;
        }
        run.set_pool_vus(0);
        Ok(())
    }
}

async fn vu_loop(vu: u64, run: Arc<ScenarioRun>, stop: StopSignal, gate: Arc<IterationGate>) {
    let _active = run.active_guard();
    while !stop.is_stopped() && gate.next() {
        run.iteration(vu).await;
        run.think(&stop, gate.deadline()).await;
    }
}
