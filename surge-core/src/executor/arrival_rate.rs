use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use super::Executor;
use crate::config::{ExecutorKind, Stage};
use crate::error::Result;
use crate::pool::{Admission, RateAccumulator, WorkerPool};
use crate::schedule::RampingSchedule;
use crate::signal::StopSignal;
use crate::vu::ScenarioRun;

pub const DISPATCH_TICK: Duration = Duration::from_millis(10);

/// Open-model executor: starts iterations at the scheduled rate regardless of how long they take.
///
/// The dispatch loop owns the pool. It grows the pool by one worker per iteration no idle
/// worker can take (up to `max_vus`), drops iterations beyond that, and retires workers idle
/// for longer than `idle_timeout` down to `pre_allocated_vus`.
#[derive(Debug, Clone)]
pub struct RampingArrivalRate {
    schedule: Arc<RampingSchedule>,
    time_unit: Duration,
    pre_allocated_vus: u64,
    max_vus: u64,
    tick: Duration,
    idle_timeout: Duration,
}

impl RampingArrivalRate {
    pub fn new(
        start_rate: u64,
        time_unit: Duration,
        pre_allocated_vus: u64,
        max_vus: u64,
        idle_timeout: Duration,
        stages: Vec<Stage>,
    ) -> Self {
        Self {
            schedule: Arc::new(RampingSchedule::new(start_rate, stages)),
            time_unit,
            pre_allocated_vus,
            max_vus,
            tick: DISPATCH_TICK,
            idle_timeout,
        }
    }
}

type JobQueue = mpsc::Sender<()>;

struct Workers {
    run: Arc<ScenarioRun>,
    stop: StopSignal,
    idle_tx: mpsc::UnboundedSender<u64>,
    queues: HashMap<u64, JobQueue>,
    tasks: JoinSet<()>,
}

impl Workers {
    fn spawn(&mut self, id: u64) {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let (run, stop, idle_tx) = (self.run.clone(), self.stop.clone(), self.idle_tx.clone());

        self.tasks.spawn(async move {
            while rx.recv().await.is_some() {
                {
                    let _busy = run.active_guard();
                    // A panicking iteration must not take the worker with it.
                    let iteration = {
                        let run = run.clone();
                        tokio::spawn(async move {
                            run.iteration(id).await;
                        })
                    };
                    if let Err(err) = iteration.await
                        && err.is_panic()
                    {
                        tracing::warn!(scenario = %run.name(), worker = id, "iteration panicked");
                    }
                    run.think(&stop, None).await;
                }
                if idle_tx.send(id).is_err() {
                    break;
                }
            }
        });
        self.queues.insert(id, tx);
    }

    /// Hands one iteration to worker `id`; `false` if that worker is gone.
    fn dispatch(&mut self, id: u64) -> bool {
        match self.queues.get(&id) {
            Some(queue) => queue.try_send(()).is_ok(),
            None => false,
        }
    }

    fn retire(&mut self, id: u64) {
        self.queues.remove(&id);
    }
}

#[async_trait]
impl Executor for RampingArrivalRate {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::RampingArrivalRate
    }

    async fn drive(&self, run: Arc<ScenarioRun>, stop: StopSignal) -> Result<()> {
        let started = run.mark_started();
        let total = self.schedule.total_duration();

        let (idle_tx, mut idle_rx) = mpsc::unbounded_channel::<u64>();
        let mut workers = Workers {
            run: run.clone(),
            stop: stop.clone(),
            idle_tx,
            queues: HashMap::new(),
            tasks: JoinSet::new(),
        };

        let mut pool = WorkerPool::new(self.pre_allocated_vus, self.max_vus, Instant::now());
        for id in 1..=self.pre_allocated_vus {
            workers.spawn(id);
        }
        run.set_pool_vus(pool.size());

        tracing::info!(
            scenario = %run.name(),
            pre_allocated_vus = self.pre_allocated_vus,
            max_vus = self.max_vus,
            "arrival-rate dispatch started"
        );

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut rate = RateAccumulator::new();
        let mut last_tick = Instant::now();
        let mut dropped_total = 0u64;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = stop.wait() => break,
                Some(res) = workers.tasks.join_next(), if !workers.tasks.is_empty() => {
                    // Retired workers exit here; anything else leaving early is logged.
                    if let Err(err) = res {
                        tracing::warn!(scenario = %run.name(), error = %err, "arrival-rate worker failed");
                    }
                    continue;
                }
            }

            let now = Instant::now();
            let elapsed = now.duration_since(started);
            if elapsed >= total {
                break;
            }

            while let Ok(id) = idle_rx.try_recv() {
                pool.mark_idle(id, now);
            }

            let dt = now.duration_since(last_tick);
            last_tick = now;
            let due = rate.advance(self.schedule.value_at(elapsed), dt, self.time_unit);

            let mut dropped = 0u64;
            for _ in 0..due {
                loop {
                    match pool.admit() {
                        Admission::Idle(id) => {
                            if workers.dispatch(id) {
                                break;
                            }
                            pool.forget(id);
                            workers.retire(id);
                        }
                        Admission::Spawn(id) => {
                            tracing::debug!(scenario = %run.name(), worker = id, "growing arrival-rate pool");
                            workers.spawn(id);
                            if workers.dispatch(id) {
                                break;
                            }
                            pool.forget(id);
                            workers.retire(id);
                        }
                        Admission::Drop => {
                            dropped += 1;
                            break;
                        }
                    }
                }
            }

            if dropped > 0 {
                dropped_total += dropped;
                run.record_dropped(dropped);
                tracing::debug!(
                    scenario = %run.name(),
                    dropped,
                    pool = pool.size(),
                    "pool saturated; iterations dropped"
                );
            }

            for id in pool.retire_idle(now, self.idle_timeout) {
                workers.retire(id);
            }
            run.set_pool_vus(pool.size());
        }

        // Closing the queues lets every worker finish its in-flight iteration and exit.
        workers.queues.clear();
        while let Some(res) = workers.tasks.join_next().await {
            if let Err(err) = res {
                tracing::warn!(scenario = %run.name(), error = %err, "arrival-rate worker failed");
            }
        }
        run.set_pool_vus(0);

        tracing::info!(
            scenario = %run.name(),
            dropped_iterations = dropped_total,
            "arrival-rate dispatch finished"
        );
        Ok(())
    }
}
