use std::path::Path;
use std::sync::Arc;

mod format;
mod progress;

use format::{format_duration, format_rate};
use progress::HumanProgress;
use surge_core::{ExecutorKind, ProgressUpdate};

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, file: &Path, plan: &surge_core::RunPlan) {
        println!("file: {}", file.display());
        for s in plan.scenarios() {
            let executor = s
                .executor
                .map(|k| k.to_string())
                .unwrap_or_else(|| "?".to_string());
            match s.error() {
                None => println!(
                    "scenario: {} exec={} executor={executor} start={}",
                    s.name,
                    s.exec,
                    format_duration(s.start_time)
                ),
                Some(err) => println!("scenario: {} exec={} invalid: {err}", s.name, s.exec),
            }
        }
        println!();
    }

    fn progress(&self) -> Option<surge_core::ProgressFn> {
        let progress = self.progress.clone();
        Some(Arc::new(move |u| {
            progress.update(&u.scenario, u.planned_duration, u.elapsed, message(&u));
        }))
    }

    fn print_summary(&self, result: &surge_core::RunResult) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", surge_core::report::render_text(result));
        Ok(())
    }
}

fn message(u: &ProgressUpdate) -> String {
    let vus = match u.executor {
        ExecutorKind::RampingArrivalRate => format!(
            "vus={}/{} busy={} dropped={}",
            u.pool_vus, u.max_vus, u.active_vus, u.dropped_total
        ),
        _ => format!("vus={}/{}", u.active_vus, u.max_vus),
    };

    let mut msg = format!(
        "{vus} elapsed={} rps={} reqs={} errors={}",
        format_duration(u.elapsed),
        format_rate(u.rps_now),
        u.requests_total,
        u.failures_total
    );
    if let Some(stage) = &u.stage {
        msg.push_str(&format!(
            " stage={}/{} target={:.0}",
            stage.stage, stage.stages, stage.current_target
        ));
    }
    msg
}
