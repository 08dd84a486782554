use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context as _;
use surge_testserver::TestServer;

fn status_code(out: &Output) -> i32 {
    out.status.code().unwrap_or(-1)
}

fn write_doc(dir: &Path, name: &str, yaml: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, yaml).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

async fn surge(args: Vec<String>) -> anyhow::Result<Output> {
    let exe = env!("CARGO_BIN_EXE_surge");
    tokio::task::spawn_blocking(move || {
        Command::new(exe)
            .args(&args)
            .env_remove("BASE_URL")
            .env_remove("API_KEY")
            .output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run surge binary")
}

fn ensure_code(out: &Output, want: i32) -> anyhow::Result<()> {
    anyhow::ensure!(
        status_code(out) == want,
        "expected exit code {want}, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    Ok(())
}

const INGEST_WORKLOAD: &str = r#"
workloads:
  ingestEvent:
    method: POST
    path: /v1/events
    headers: { Content-Type: application/json }
    body: '{"actor":{"id":"user-${uuid}"},"action":{"name":"load.test"},"resource":{"type":"test","id":"${uuid}"}}'
    checks: { status: [202], jsonFields: [event_id] }
"#;

fn run_args(doc: &Path, base_url: &str, extra: &[&str]) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        doc.display().to_string(),
        "--base-url".to_string(),
        base_url.to_string(),
        "--output".to_string(),
        "json".to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    args
}

#[tokio::test]
async fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let out = surge(vec![
        "run".to_string(),
        "./does-not-matter.yaml".to_string(),
        "--output".to_string(),
        "xml".to_string(),
    ])
    .await?;
    ensure_code(&out, 30)
}

#[tokio::test]
async fn missing_document_exit_30() -> anyhow::Result<()> {
    let out = surge(vec!["run".to_string(), "./missing.yaml".to_string()]).await?;
    ensure_code(&out, 30)
}

#[tokio::test]
async fn passing_run_exit_0_and_writes_summary() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir()?;
    let doc = write_doc(
        dir.path(),
        "pass.yaml",
        &format!(
            "{INGEST_WORKLOAD}scenarios:\n  - {{ name: load, vus: 2, iterations: 10 }}\nthresholds:\n  errors: \"rate<0.01\"\n  http_req_duration: [\"p(99)<5000\"]\n"
        ),
    )?;
    let summary_path = dir.path().join("results/summary.json");
    let summary_arg = summary_path.display().to_string();

    let out = surge(run_args(
        &doc,
        server.base_url(),
        &["--summary-out", &summary_arg],
    ))
    .await?;
    let accepted = server.stats().events_accepted();
    server.shutdown().await;

    ensure_code(&out, 0)?;
    anyhow::ensure!(accepted == 10, "server accepted {accepted} events");

    let summary: serde_json::Value = serde_json::from_slice(
        &std::fs::read(&summary_path).context("read summary file")?,
    )?;
    anyhow::ensure!(summary["verdict"] == "PASS", "summary: {summary}");
    anyhow::ensure!(summary["metrics"]["http_reqs"]["values"]["count"] == 10.0);

    let stdout = String::from_utf8_lossy(&out.stdout);
    let last = stdout.lines().last().unwrap_or_default();
    let line: serde_json::Value = serde_json::from_str(last).context("parse summary line")?;
    anyhow::ensure!(line["kind"] == "summary", "last line: {last}");
    Ok(())
}

#[tokio::test]
async fn thresholds_failed_exit_11() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir()?;
    let yaml = format!(
        "{}scenarios:\n  - {{ name: load, vus: 1, iterations: 5 }}\nthresholds:\n  errors: \"rate<0.01\"\n",
        INGEST_WORKLOAD.replace("/v1/events", "/v1/events/unacked")
    );
    let doc = write_doc(dir.path(), "unacked.yaml", &yaml)?;

    let out = surge(run_args(&doc, server.base_url(), &[])).await?;
    server.shutdown().await;
    ensure_code(&out, 11)
}

#[tokio::test]
async fn thresholds_undetermined_exit_12() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir()?;
    let doc = write_doc(
        dir.path(),
        "undetermined.yaml",
        &format!(
            "{INGEST_WORKLOAD}scenarios:\n  - {{ name: load, vus: 1, iterations: 2 }}\nthresholds:\n  event_latency: \"avg<100\"\n"
        ),
    )?;

    let out = surge(run_args(&doc, server.base_url(), &[])).await?;
    server.shutdown().await;
    ensure_code(&out, 12)
}

#[tokio::test]
async fn scenario_failed_exit_13() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir()?;
    let doc = write_doc(
        dir.path(),
        "isolation.yaml",
        &format!(
            "{INGEST_WORKLOAD}scenarios:\n  - {{ name: load, exec: ingestEvent, vus: 1, iterations: 2 }}\n  - {{ name: query, exec: queryList, vus: 1, iterations: 2 }}\n"
        ),
    )?;

    let out = surge(run_args(&doc, server.base_url(), &[])).await?;
    let accepted = server.stats().events_accepted();
    server.shutdown().await;

    ensure_code(&out, 13)?;
    anyhow::ensure!(accepted == 2, "sibling scenario should still run, accepted {accepted}");
    Ok(())
}

#[tokio::test]
async fn api_key_is_sent_with_every_request() -> anyhow::Result<()> {
    let server = TestServer::start_with_api_key("secret")
        .await
        .context("start test server")?;
    let dir = tempfile::tempdir()?;
    let doc = write_doc(
        dir.path(),
        "auth.yaml",
        &format!("{INGEST_WORKLOAD}scenarios:\n  - {{ vus: 1, iterations: 3 }}\n"),
    )?;

    let out = surge(run_args(&doc, server.base_url(), &["--api-key", "secret"])).await?;
    let unauthorized = server.stats().unauthorized();
    server.shutdown().await;

    ensure_code(&out, 0)?;
    anyhow::ensure!(unauthorized == 0, "{unauthorized} requests were rejected");
    Ok(())
}

#[tokio::test]
async fn validate_reports_invalid_scenarios() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let good = write_doc(
        dir.path(),
        "good.yaml",
        &format!("{INGEST_WORKLOAD}scenarios:\n  - {{ vus: 1, iterations: 1 }}\n"),
    )?;
    let bad = write_doc(
        dir.path(),
        "bad.yaml",
        &format!(
            "{INGEST_WORKLOAD}scenarios:\n  - {{ executor: ramping-arrival-rate, preAllocatedVUs: 5, maxVUs: 2, stages: [{{ duration: 1s, target: 1 }}] }}\n"
        ),
    )?;

    let out = surge(vec!["validate".to_string(), good.display().to_string()]).await?;
    ensure_code(&out, 0)?;

    let out = surge(vec!["validate".to_string(), bad.display().to_string()]).await?;
    ensure_code(&out, 30)
}
