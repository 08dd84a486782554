use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use surge_core::report::Summary;

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _file: &Path, _plan: &surge_core::RunPlan) {}

    fn progress(&self) -> Option<surge_core::ProgressFn> {
        Some(Arc::new(move |u| {
            emit_json_line(&JsonProgressLine::from(&u));
        }))
    }

    fn print_summary(&self, result: &surge_core::RunResult) -> anyhow::Result<()> {
        emit_json_line(&JsonSummaryLine {
            kind: "summary",
            summary: Summary::from_result(result),
        });
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_seconds: f64,
    pub scenario: String,
    pub exec: String,
    pub executor: String,
    pub active_vus: u64,
    pub pool_vus: u64,
    pub max_vus: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<JsonStage>,
    pub requests_total: u64,
    pub failures_total: u64,
    pub iterations_total: u64,
    pub dropped_iterations_total: u64,
    pub requests_per_sec: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JsonStage {
    pub stage: usize,
    pub stages: usize,
    pub current_target: f64,
    pub remaining_seconds: f64,
}

impl From<&surge_core::ProgressUpdate> for JsonProgressLine {
    fn from(u: &surge_core::ProgressUpdate) -> Self {
        Self {
            kind: "progress",
            tick: u.tick,
            elapsed_seconds: u.elapsed.as_secs_f64(),
            scenario: u.scenario.clone(),
            exec: u.exec.clone(),
            executor: u.executor.to_string(),
            active_vus: u.active_vus,
            pool_vus: u.pool_vus,
            max_vus: u.max_vus,
            stage: u.stage.as_ref().map(|s| JsonStage {
                stage: s.stage,
                stages: s.stages,
                current_target: s.current_target,
                remaining_seconds: s.stage_remaining.as_secs_f64(),
            }),
            requests_total: u.requests_total,
            failures_total: u.failures_total,
            iterations_total: u.iterations_total,
            dropped_iterations_total: u.dropped_total,
            requests_per_sec: u.rps_now,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    #[serde(flatten)]
    pub summary: Summary,
}

fn emit_json_line<T: Serialize>(line: &T) {
    let Ok(s) = serde_json::to_string(line) else {
        return;
    };
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{s}");
    let _ = out.flush();
}
