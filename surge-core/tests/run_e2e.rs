use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use surge_core::{
    Checks, HttpRequest, HttpResponse, IterationInfo, ProgressFn, ProgressUpdate, RunOptions,
    RunPlan, ScenarioOptions, ScenarioState, SeriesValue, Stage, StopSignal, ThresholdSet,
    Verdict, Workload, Workloads, run,
};
use surge_testserver::TestServer;

fn event_body(info: &IterationInfo<'_>) -> String {
    serde_json::json!({
        "actor": { "id": format!("vu-{}", info.vu), "type": "user" },
        "action": { "name": "user.login" },
        "resource": { "type": "session", "id": format!("it-{}", info.iteration) },
    })
    .to_string()
}

/// Posts one event and requires the gateway to acknowledge it with an id.
struct IngestEvent {
    path: &'static str,
}

impl Workload for IngestEvent {
    fn request(&self, info: &IterationInfo<'_>) -> Result<HttpRequest, String> {
        Ok(HttpRequest::post(self.path, event_body(info))
            .with_header("Content-Type", "application/json"))
    }

    fn check(&self, response: &HttpResponse, _latency: Duration, checks: &mut Checks) {
        checks.check("status is 202", response.status == 202);
        let acked = response
            .body_utf8()
            .and_then(|b| serde_json::from_str::<serde_json::Value>(b).ok())
            .is_some_and(|v| v.get("event_id").is_some_and(|id| !id.is_null()));
        checks.check("has event_id", acked);
    }
}

fn constant(name: &str, exec: &str, vus: u64, iterations: u64) -> ScenarioOptions {
    ScenarioOptions {
        name: name.to_string(),
        exec: Some(exec.to_string()),
        vus: Some(vus),
        iterations: Some(iterations),
        duration: Some(Duration::from_secs(10)),
        ..ScenarioOptions::default()
    }
}

fn options(server: &TestServer) -> RunOptions {
    RunOptions {
        base_url: server.base_url().to_string(),
        ..RunOptions::default()
    }
}

fn errors_rate(snapshot: &surge_core::MetricsSnapshot) -> Option<(u64, u64)> {
    match snapshot.metric(surge_core::ERRORS) {
        Some(SeriesValue::Rate { hits, total }) => Some((hits, total)),
        _ => None,
    }
}

fn counter(snapshot: &surge_core::MetricsSnapshot, name: &str) -> u64 {
    snapshot
        .metric(name)
        .and_then(|v| v.counter_total())
        .unwrap_or(0)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn acknowledged_events_pass_thresholds() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let workloads = Workloads::new().with("ingestEvent", IngestEvent { path: "/v1/events" });
    let plan = RunPlan::new(
        vec![constant("load", "ingestEvent", 2, 20)],
        &[
            ThresholdSet {
                metric: "errors".to_string(),
                expressions: vec!["rate<0.01".to_string()],
            },
            ThresholdSet {
                metric: "http_req_duration".to_string(),
                expressions: vec!["p(99)<5000".to_string()],
            },
        ],
        &workloads,
    )
    .unwrap_or_else(|e| panic!("plan: {e}"));

    let result = run(plan, options(&server), StopSignal::new()).await;

    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(result.scenarios[0].state, ScenarioState::Completed);
    assert_eq!(counter(&result.snapshot, surge_core::HTTP_REQS), 20);
    assert_eq!(counter(&result.snapshot, surge_core::ITERATIONS), 20);
    assert_eq!(errors_rate(&result.snapshot), Some((0, 20)));
    assert_eq!(server.stats().events_accepted(), 20);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unacknowledged_events_count_as_errors() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let workloads =
        Workloads::new().with("ingestEvent", IngestEvent { path: "/v1/events/unacked" });
    let plan = RunPlan::new(
        vec![constant("load", "ingestEvent", 1, 5)],
        &[ThresholdSet {
            metric: "errors".to_string(),
            expressions: vec!["rate<0.01".to_string()],
        }],
        &workloads,
    )
    .unwrap_or_else(|e| panic!("plan: {e}"));

    let result = run(plan, options(&server), StopSignal::new()).await;

    assert_eq!(result.verdict, Verdict::Fail);
    assert!(result.any_threshold(Verdict::Fail));
    assert_eq!(errors_rate(&result.snapshot), Some((5, 5)));
    let check_failed = result.snapshot.aggregate(
        surge_core::HTTP_REQ_ERRORS,
        &[("error_kind".to_string(), "check_failed".to_string())],
    );
    assert_eq!(check_failed.and_then(|v| v.counter_total()), Some(5));

    let has_id = result.snapshot.aggregate(
        surge_core::CHECKS,
        &[("check".to_string(), "has event_id".to_string())],
    );
    assert!(matches!(has_id, Some(SeriesValue::Rate { hits: 0, total: 5 })));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn non_success_status_without_checks_is_an_error() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let workloads = Workloads::new().with(
        "broken",
        |_: &IterationInfo<'_>| -> Result<HttpRequest, String> { Ok(HttpRequest::get("/status/503")) },
    );
    let plan = RunPlan::new(vec![constant("broken", "broken", 1, 3)], &[], &workloads)
        .unwrap_or_else(|e| panic!("plan: {e}"));

    let result = run(plan, options(&server), StopSignal::new()).await;

    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(errors_rate(&result.snapshot), Some((3, 3)));
    let unexpected = result.snapshot.aggregate(
        surge_core::HTTP_REQ_ERRORS,
        &[("error_kind".to_string(), "unexpected_status".to_string())],
    );
    assert_eq!(unexpected.and_then(|v| v.counter_total()), Some(3));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn saturated_arrival_rate_drops_instead_of_failing() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let workloads = Workloads::new().with(
        "slow",
        |_: &IterationInfo<'_>| -> Result<HttpRequest, String> { Ok(HttpRequest::get("/slow?ms=400")) },
    );
    let scenario = ScenarioOptions {
        name: "spike".to_string(),
        exec: Some("slow".to_string()),
        executor: Some("ramping-arrival-rate".to_string()),
        start_rate: Some(40),
        time_unit: Some(Duration::from_secs(1)),
        pre_allocated_vus: Some(1),
        max_vus: Some(2),
        stages: vec![Stage::new(Duration::from_secs(1), 40)],
        ..ScenarioOptions::default()
    };
    let plan = RunPlan::new(vec![scenario], &[], &workloads)
        .unwrap_or_else(|e| panic!("plan: {e}"));

    let result = run(plan, options(&server), StopSignal::new()).await;

    assert_eq!(result.scenarios[0].state, ScenarioState::Completed);
    let dropped = counter(&result.snapshot, surge_core::DROPPED_ITERATIONS);
    let completed = counter(&result.snapshot, surge_core::ITERATIONS);
    assert!(dropped > 0, "expected dropped iterations, got {dropped}");
    assert!(completed > 0);
    assert!(completed <= 8, "two workers cannot finish {completed} slow iterations in 1s");
    let (hits, _) = errors_rate(&result.snapshot).unwrap_or_else(|| panic!("errors missing"));
    assert_eq!(hits, 0);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_scenario_fails_alone() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let workloads = Workloads::new().with("ingestEvent", IngestEvent { path: "/v1/events" });
    let plan = RunPlan::new(
        vec![
            constant("load", "ingestEvent", 1, 3),
            constant("query", "queryList", 1, 3),
        ],
        &[],
        &workloads,
    )
    .unwrap_or_else(|e| panic!("plan: {e}"));
    assert_eq!(plan.scenario_errors().count(), 1);

    let result = run(plan, options(&server), StopSignal::new()).await;

    assert_eq!(result.scenarios[0].state, ScenarioState::Completed);
    assert_eq!(result.scenarios[1].state, ScenarioState::Failed);
    assert!(
        result.scenarios[1]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("queryList"))
    );
    assert_eq!(counter(&result.snapshot, surge_core::HTTP_REQS), 3);
    assert_eq!(result.verdict, Verdict::Fail);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_fails_scenarios_that_have_not_started() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let workloads = Workloads::new().with("ingestEvent", IngestEvent { path: "/v1/events" });
    let mut late = constant("late", "ingestEvent", 1, 1);
    late.start_time = Some(Duration::from_secs(30));
    let mut steady = constant("steady", "ingestEvent", 1, 1_000_000);
    steady.iterations = None;
    steady.duration = Some(Duration::from_secs(30));
    steady.think_time = Some(Duration::from_millis(10));

    let plan = RunPlan::new(vec![steady, late], &[], &workloads)
        .unwrap_or_else(|e| panic!("plan: {e}"));

    let stop = StopSignal::new();
    let stopper = {
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            stop.stop();
        })
    };
    let started = std::time::Instant::now();
    let result = run(plan, options(&server), stop).await;
    stopper
        .await
        .unwrap_or_else(|e| panic!("stopper task: {e}"));

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(result.interrupted);
    assert_eq!(result.scenarios[0].state, ScenarioState::Completed);
    assert_eq!(result.scenarios[1].state, ScenarioState::Failed);
    assert!(counter(&result.snapshot, surge_core::ITERATIONS) > 0);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ramping_vus_ramp_up_and_back_down() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let workloads = Workloads::new().with("ingestEvent", IngestEvent { path: "/v1/events" });
    let scenario = ScenarioOptions {
        name: "ramp".to_string(),
        exec: Some("ingestEvent".to_string()),
        executor: Some("ramping-vus".to_string()),
        start_vus: Some(0),
        think_time: Some(Duration::from_millis(20)),
        stages: vec![
            Stage::new(Duration::from_millis(400), 3),
            Stage::new(Duration::from_millis(400), 0),
        ],
        ..ScenarioOptions::default()
    };
    let plan = RunPlan::new(vec![scenario], &[], &workloads)
        .unwrap_or_else(|e| panic!("plan: {e}"));

    let result = run(plan, options(&server), StopSignal::new()).await;

    assert_eq!(result.scenarios[0].state, ScenarioState::Completed);
    assert!(counter(&result.snapshot, surge_core::ITERATIONS) > 0);
    assert_eq!(errors_rate(&result.snapshot).map(|(hits, _)| hits), Some(0));
    assert!(result.scenarios[0].elapsed < Duration::from_secs(5));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unbuildable_requests_are_errors_but_not_requests() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let workloads = Workloads::new().with(
        "unbuildable",
        |_: &IterationInfo<'_>| -> Result<HttpRequest, String> { Err("no payload".to_string()) },
    );
    let plan = RunPlan::new(vec![constant("bad", "unbuildable", 1, 3)], &[], &workloads)
        .unwrap_or_else(|e| panic!("plan: {e}"));

    let result = run(plan, options(&server), StopSignal::new()).await;

    assert_eq!(result.scenarios[0].state, ScenarioState::Completed);
    assert_eq!(counter(&result.snapshot, surge_core::HTTP_REQS), 0);
    assert!(result.snapshot.metric(surge_core::HTTP_REQ_DURATION).is_none());
    assert_eq!(errors_rate(&result.snapshot), Some((3, 3)));
    let invalid = result.snapshot.aggregate(
        surge_core::HTTP_REQ_ERRORS,
        &[("error_kind".to_string(), "invalid_request".to_string())],
    );
    assert_eq!(invalid.and_then(|v| v.counter_total()), Some(3));
    assert_eq!(counter(&result.snapshot, surge_core::ITERATIONS), 3);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_virtual_user_is_replaced() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let calls = Arc::new(AtomicU64::new(0));
    let workload = {
        let calls = calls.clone();
        move |_: &IterationInfo<'_>| -> Result<HttpRequest, String> {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first request blows up");
            }
            Ok(HttpRequest::get("/health"))
        }
    };
    let workloads = Workloads::new().with("flaky", workload);
    let mut scenario = constant("flaky", "flaky", 2, 1);
    scenario.iterations = None;
    scenario.duration = Some(Duration::from_millis(800));
    scenario.think_time = Some(Duration::from_millis(5));

    let plan = RunPlan::new(vec![scenario], &[], &workloads)
        .unwrap_or_else(|e| panic!("plan: {e}"));

    let result = run(plan, options(&server), StopSignal::new()).await;

    assert_eq!(result.scenarios[0].state, ScenarioState::Completed);
    let iterations = counter(&result.snapshot, surge_core::ITERATIONS);
    assert!(iterations > 10, "iterations stalled at {iterations}");
    // Only the panicking call went unrecorded.
    assert_eq!(calls.load(Ordering::SeqCst), iterations + 1);
    assert_eq!(errors_rate(&result.snapshot).map(|(hits, _)| hits), Some(0));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_time_delays_scenario_while_sibling_runs() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let workloads = Workloads::new().with("ingestEvent", IngestEvent { path: "/v1/events" });
    let timed = |name: &str, offset: Duration| {
        let mut s = constant(name, "ingestEvent", 1, 1);
        s.iterations = None;
        s.duration = Some(Duration::from_millis(300));
        s.think_time = Some(Duration::from_millis(10));
        s.start_time = Some(offset);
        s
    };
    let plan = RunPlan::new(
        vec![
            timed("first", Duration::ZERO),
            timed("second", Duration::from_millis(600)),
        ],
        &[],
        &workloads,
    )
    .unwrap_or_else(|e| panic!("plan: {e}"));

    let started = std::time::Instant::now();
    let result = run(plan, options(&server), StopSignal::new()).await;
    let total = started.elapsed();

    assert!(total >= Duration::from_millis(900), "run took only {total:?}");
    assert!(total < Duration::from_secs(5));
    assert!(!result.interrupted);
    for s in &result.scenarios {
        assert_eq!(s.state, ScenarioState::Completed, "{} did not complete", s.name);
        assert!(s.elapsed >= Duration::from_millis(300));
    }
    assert_eq!(result.scenarios[1].start_time, Duration::from_millis(600));

    let second = result
        .snapshot
        .aggregate(surge_core::ITERATIONS, &[("scenario".to_string(), "second".to_string())]);
    assert!(second.and_then(|v| v.counter_total()).is_some_and(|n| n > 0));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn arrival_rate_pool_shrinks_after_idle_timeout() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let workloads = Workloads::new().with(
        "slow",
        |_: &IterationInfo<'_>| -> Result<HttpRequest, String> { Ok(HttpRequest::get("/slow?ms=200")) },
    );
    // 40/s of 200ms iterations for 1.5s, then nothing until 4s.
    let scenario = ScenarioOptions {
        name: "burst".to_string(),
        exec: Some("slow".to_string()),
        executor: Some("ramping-arrival-rate".to_string()),
        start_rate: Some(40),
        pre_allocated_vus: Some(1),
        max_vus: Some(12),
        idle_timeout: Some(Duration::from_millis(300)),
        stages: vec![
            Stage::new(Duration::from_millis(1500), 40),
            Stage::new(Duration::ZERO, 0),
            Stage::new(Duration::from_millis(2500), 0),
        ],
        ..ScenarioOptions::default()
    };
    let plan = RunPlan::new(vec![scenario], &[], &workloads)
        .unwrap_or_else(|e| panic!("plan: {e}"));

    let seen: Arc<Mutex<Vec<(Duration, u64)>>> = Arc::default();
    let progress: ProgressFn = {
        let seen = seen.clone();
        Arc::new(move |update: ProgressUpdate| {
            seen.lock()
                .unwrap_or_else(|e| panic!("progress lock: {e}"))
                .push((update.elapsed, update.pool_vus));
        })
    };
    let opts = RunOptions {
        progress: Some(progress),
        ..options(&server)
    };

    let result = run(plan, opts, StopSignal::new()).await;
    assert_eq!(result.scenarios[0].state, ScenarioState::Completed);

    let seen = seen
        .lock()
        .unwrap_or_else(|e| panic!("progress lock: {e}"))
        .clone();
    let peak = seen.iter().map(|(_, pool)| *pool).max().unwrap_or(0);
    assert!(peak > 1, "pool never grew: {seen:?}");
    let settled: Vec<u64> = seen
        .iter()
        .filter(|(elapsed, _)| {
            (Duration::from_millis(2500)..Duration::from_millis(3800)).contains(elapsed)
        })
        .map(|(_, pool)| *pool)
        .collect();
    assert!(!settled.is_empty(), "no progress after the burst: {seen:?}");
    assert!(settled.iter().all(|pool| *pool == 1), "pool did not shrink: {seen:?}");

    server.shutdown().await;
}
