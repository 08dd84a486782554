use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;

use super::{Executor, supervise};
use crate::config::{ExecutorKind, Stage};
use crate::error::{Error, Result};
use crate::schedule::RampingSchedule;
use crate::signal::StopSignal;
use crate::vu::ScenarioRun;

/// VU `k` iterates only while `k <= target(t)`.
#[derive(Debug, Clone)]
pub struct RampingVus {
    schedule: Arc<RampingSchedule>,
}

impl RampingVus {
    pub fn new(start_vus: u64, stages: Vec<Stage>) -> Self {
        Self {
            schedule: Arc::new(RampingSchedule::new(start_vus, stages)),
        }
    }

    fn max_vus(&self) -> u64 {
        let max_stage = self.schedule.stages().iter().map(|s| s.target).max().unwrap_or(0);
        max_stage.max(self.schedule.target_at(Duration::ZERO))
    }
}

#[async_trait]
impl Executor for RampingVus {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::RampingVus
    }

    async fn drive(&self, run: Arc<ScenarioRun>, stop: StopSignal) -> Result<()> {
        let started = run.mark_started();
        let total = self.schedule.total_duration();
        let max_vus = self.max_vus();
        run.set_pool_vus(max_vus);

        let mut vus = JoinSet::new();
        for vu in 1..=max_vus {
            let keep_going = {
                let stop = stop.clone();
                move || !stop.is_stopped() && started.elapsed() < total
            };
            let spawn_loop = {
                let (run, stop, schedule) = (run.clone(), stop.clone(), self.schedule.clone());
                move || vu_loop(vu, run.clone(), stop.clone(), schedule.clone())
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

async fn vu_loop(vu: u64, run: Arc<ScenarioRun>, stop: StopSignal, schedule: Arc<RampingSchedule>) {
    let started = run.mark_started();
    let end = started + schedule.total_duration();

    while !stop.is_stopped() {
        let elapsed = started.elapsed();
        if schedule.is_done(elapsed) {
            break;
        }

        if vu <= schedule.target_at(elapsed) {
            let _active = run.active_guard();
            run.iteration(vu).await;
            run.think(&stop, Some(end)).await;
            continue;
        }

        let wait = schedule
            .next_recheck_in(elapsed, vu)
            .max(Duration::from_millis(1));
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop.wait() => {}
        }
    }
}
