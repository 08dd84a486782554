use std::path::Path;

use anyhow::Context as _;
use surge_core::{RunOptions, RunPlan, RunResult, StopSignal};

use crate::cli::{RunArgs, ValidateArgs};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::scenario_yaml::{LoadedDoc, load_scenario_doc};
use crate::template::build_workloads;

pub const API_KEY_HEADER: &str = "X-API-Key";

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let doc = load_scenario_doc(&args.file)
        .await
        .map_err(RunError::InvalidInput)?;

    let mut opts = run_options(&doc, &args);
    let plan = build_plan(doc).map_err(RunError::InvalidInput)?;

    let out = output::formatter(args.output);
    out.print_header(&args.file, &plan);
    opts.progress = out.progress();

    let stop = StopSignal::new();
    let interrupt = tokio::spawn(stop_on_ctrl_c(stop.clone()));

    let result = surge_core::run(plan, opts, stop).await;
    interrupt.abort();

    out.print_summary(&result).map_err(RunError::RuntimeError)?;

    if let Some(path) = &args.summary_out {
        write_summary(path, &result)
            .await
            .map_err(RunError::RuntimeError)?;
    }

    Ok(ExitCode::from_run_result(&result))
}

/// Loads the document and validates every scenario and threshold without sending a request.
pub async fn validate(args: ValidateArgs) -> Result<(), RunError> {
    let doc = load_scenario_doc(&args.file)
        .await
        .map_err(RunError::InvalidInput)?;
    let plan = build_plan(doc).map_err(RunError::InvalidInput)?;

    let errors: Vec<String> = plan
        .scenario_errors()
        .map(|(name, err)| format!("scenario `{name}`: {err}"))
        .collect();
    if !errors.is_empty() {
        return Err(RunError::InvalidInput(anyhow::anyhow!(
            "invalid scenarios in {}:\n  {}",
            args.file.display(),
            errors.join("\n  ")
        )));
    }

    println!(
        "{}: {} scenario(s), {} threshold(s) ok",
        args.file.display(),
        plan.scenarios().len(),
        plan.thresholds().len()
    );
    Ok(())
}

fn build_plan(doc: LoadedDoc) -> anyhow::Result<RunPlan> {
    let workloads = build_workloads(doc.workloads)?;
    RunPlan::new(doc.scenarios, &doc.thresholds, &workloads).context("invalid scenario document")
}

/// CLI flags and env win over the document; `--header` and the API key win over document headers.
fn run_options(doc: &LoadedDoc, args: &RunArgs) -> RunOptions {
    let defaults = RunOptions::default();

    let base_url = args
        .base_url
        .clone()
        .or_else(|| doc.base_url.clone())
        .unwrap_or_else(|| defaults.base_url.clone());

    let mut headers = doc.headers.clone();
    let overrides = args
        .headers
        .iter()
        .cloned()
        .chain(args.api_key.clone().map(|key| (API_KEY_HEADER.to_string(), key)));
    for (name, value) in overrides {
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        headers.push((name, value));
    }

    RunOptions {
        base_url,
        headers,
        request_timeout: doc.request_timeout.or(defaults.request_timeout),
        ..defaults
    }
}

async fn stop_on_ctrl_c(stop: StopSignal) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("interrupt received, stopping scenarios");
        stop.stop();
    }
}

async fn write_summary(path: &Path, result: &RunResult) -> anyhow::Result<()> {
    let json = surge_core::report::render_json(result).context("failed to serialize summary")?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write summary: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::cli::OutputFormat;
    use crate::scenario_yaml::parse_scenario_doc;

    fn args() -> RunArgs {
        RunArgs {
            file: PathBuf::from("doc.yaml"),
            base_url: None,
            api_key: None,
            headers: Vec::new(),
            output: OutputFormat::Json,
            summary_out: None,
            log_level: None,
        }
    }

    fn doc(yaml: &str) -> LoadedDoc {
        parse_scenario_doc(yaml.as_bytes(), "doc").unwrap_or_else(|e| panic!("{e:#}"))
    }

    const DOC: &str = r#"
baseUrl: http://gateway:9080
requestTimeout: 5s
headers: { X-Consumer-Name: audit-producer, X-API-Key: from-doc }
workloads:
  health: { path: /health }
scenarios:
  - { vus: 1, iterations: 1 }
"#;

    #[test]
    fn document_values_apply_without_flags() {
        let opts = run_options(&doc(DOC), &args());
        assert_eq!(opts.base_url, "http://gateway:9080");
        assert_eq!(opts.request_timeout, Some(std::time::Duration::from_secs(5)));
        assert_eq!(opts.headers.len(), 2);
    }

    #[test]
    fn flags_override_document() {
        let mut a = args();
        a.base_url = Some("http://127.0.0.1:1".to_string());
        a.api_key = Some("secret".to_string());
        a.headers = vec![("x-consumer-name".to_string(), "cli".to_string())];

        let opts = run_options(&doc(DOC), &a);
        assert_eq!(opts.base_url, "http://127.0.0.1:1");
        assert_eq!(
            opts.headers,
            vec![
                ("x-consumer-name".to_string(), "cli".to_string()),
                ("X-API-Key".to_string(), "secret".to_string()),
            ]
        );
    }

    #[test]
    fn default_base_url_when_unset() {
        let opts = run_options(&doc("scenarios:\n  - iterations: 1\n"), &args());
        assert_eq!(opts.base_url, surge_core::run::DEFAULT_BASE_URL);
    }

    #[test]
    fn plan_keeps_invalid_scenarios_but_rejects_bad_thresholds() {
        let plan = build_plan(doc(
            "workloads:\n  health: { path: /health }\nscenarios:\n  - { name: a, vus: 1, iterations: 1 }\n  - { name: b, vus: 0, iterations: 1 }\n",
        ))
        .unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(plan.scenario_errors().count(), 1);

        let bad = build_plan(doc(
            "scenarios:\n  - iterations: 1\nthresholds:\n  errors: \"p(95)<1\"\n",
        ));
        assert!(bad.is_err());
    }

    #[test]
    fn demo_documents_are_valid() {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../demos");
        for name in ["query_mix.yaml", "event_gateway.yaml", "sustained_load.yaml"] {
            let bytes = std::fs::read(dir.join(name)).unwrap_or_else(|e| panic!("{name}: {e}"));
            let doc = parse_scenario_doc(&bytes, name).unwrap_or_else(|e| panic!("{name}: {e:#}"));
            let plan = build_plan(doc).unwrap_or_else(|e| panic!("{name}: {e:#}"));
            assert_eq!(plan.scenario_errors().count(), 0, "{name}");
        }
    }
}
