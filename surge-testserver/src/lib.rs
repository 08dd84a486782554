//! In-process event-gateway double used by the integration tests.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_HEALTH: &str = "/health";
pub const PATH_EVENTS: &str = "/v1/events";
pub const PATH_EVENTS_BATCH: &str = "/v1/events/batch";
pub const PATH_EVENTS_AGGREGATIONS: &str = "/v1/events/aggregations";
/// Accepts events with 202 but never returns an `event_id`.
pub const PATH_EVENTS_UNACKED: &str = "/v1/events/unacked";
pub const PATH_STATUS: &str = "/status/{code}";
pub const PATH_SLOW: &str = "/slow";

pub const API_KEY_HEADER: &str = "x-api-key";
pub const MAX_BATCH: usize = 1000;
const RECENT_EVENTS: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    events_accepted: Arc<AtomicU64>,
    events_rejected: Arc<AtomicU64>,
    unauthorized: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn events_accepted(&self) -> u64 {
        self.events_accepted.load(Ordering::Relaxed)
    }

    pub fn events_rejected(&self) -> u64 {
        self.events_rejected.load(Ordering::Relaxed)
    }

    pub fn unauthorized(&self) -> u64 {
        self.unauthorized.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize)]
struct StoredEvent {
    event_id: String,
    received_at: String,
    event: Value,
}

#[derive(Debug, Clone, Default)]
pub struct GatewayState {
    stats: TestServerStats,
    api_key: Option<Arc<str>>,
    recent: Arc<Mutex<VecDeque<StoredEvent>>>,
}

impl GatewayState {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.map(Arc::from),
            ..Self::default()
        }
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    /// Counts the request and checks the API key when one is configured.
    fn admit(&self, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
        TestServerStats::inc(&self.stats.requests_total);

        let Some(want) = self.api_key.as_deref() else {
            return Ok(());
        };
        let got = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
        if got == Some(want) {
            Ok(())
        } else {
            TestServerStats::inc(&self.stats.unauthorized);
            Err(error_body(StatusCode::UNAUTHORIZED, "invalid or missing API key"))
        }
    }

    fn store(&self, event: Value) -> StoredEvent {
        let stored = StoredEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            received_at: now_rfc3339(),
            event,
        };
        let mut recent = self
            .recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.len() == RECENT_EVENTS {
            recent.pop_front();
        }
        recent.push_back(stored.clone());
        TestServerStats::inc(&self.stats.events_accepted);
        stored
    }
}

fn now_rfc3339() -> String {
    humantime::format_rfc3339_nanos(SystemTime::now()).to_string()
}

fn error_body(status: StatusCode, msg: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": msg })))
}

fn field_present(event: &Value, object: &str, field: &str) -> bool {
    event
        .get(object)
        .and_then(|o| o.get(field))
        .is_some_and(|v| !v.is_null())
}

/// Same required fields as the production gateway.
fn validate_event(event: &Value) -> Result<(), &'static str> {
    if !field_present(event, "actor", "id") {
        return Err("actor.id is required");
    }
    if !field_present(event, "action", "name") {
        return Err("action.name is required");
    }
    if !field_present(event, "resource", "type") || !field_present(event, "resource", "id") {
        return Err("resource.type and resource.id are required");
    }
    Ok(())
}

async fn handle_health(State(state): State<GatewayState>) -> Json<Value> {
    TestServerStats::inc(&state.stats.requests_total);
    Json(json!({ "status": "healthy" }))
}

async fn handle_ingest(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if let Err(denied) = state.admit(&headers) {
        return denied;
    }

    let event: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            TestServerStats::inc(&state.stats.events_rejected);
            return error_body(StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };
    if let Err(msg) = validate_event(&event) {
        TestServerStats::inc(&state.stats.events_rejected);
        return error_body(StatusCode::BAD_REQUEST, msg);
    }

    let stored = state.store(event);
    (
        StatusCode::ACCEPTED,
        Json(json!({ "event_id": stored.event_id, "received_at": stored.received_at })),
    )
}

async fn handle_ingest_unacked(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if let Err(denied) = state.admit(&headers) {
        return denied;
    }
    (StatusCode::ACCEPTED, Json(json!({ "status": "queued" })))
}

async fn handle_batch(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if let Err(denied) = state.admit(&headers) {
        return denied;
    }

    let events = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Array(events)) => events,
        Ok(Value::Object(mut obj)) => match obj.remove("events") {
            Some(Value::Array(events)) => events,
            _ => Vec::new(),
        },
        _ => {
            return error_body(
                StatusCode::BAD_REQUEST,
                "Invalid JSON: expected array or {events: [...]}",
            );
        }
    };

    if events.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "No events provided");
    }
    if events.len() > MAX_BATCH {
        return error_body(StatusCode::BAD_REQUEST, "Maximum 1000 events per batch");
    }

    let mut accepted = 0u64;
    let mut rejected = 0u64;
    let mut results = Vec::with_capacity(events.len());
    for event in events {
        if validate_event(&event).is_err() {
            rejected += 1;
            TestServerStats::inc(&state.stats.events_rejected);
            results.push(json!({ "event_id": "", "status": "rejected" }));
            continue;
        }
        accepted += 1;
        let stored = state.store(event);
        results.push(json!({ "event_id": stored.event_id, "status": "accepted" }));
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": accepted, "rejected": rejected, "events": results })),
    )
}

async fn handle_list(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if let Err(denied) = state.admit(&headers) {
        return denied;
    }

    let limit = query
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(50);

    let recent = state
        .recent
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let data: Vec<&StoredEvent> = recent.iter().rev().take(limit).collect();
    let has_more = recent.len() > limit;
    (StatusCode::OK, Json(json!({ "data": data, "has_more": has_more })))
}

async fn handle_aggregations(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if let Err(denied) = state.admit(&headers) {
        return denied;
    }

    let recent = state
        .recent
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut by_action: HashMap<String, u64> = HashMap::new();
    for stored in recent.iter() {
        let action = stored
            .event
            .get("action")
            .and_then(|a| a.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        *by_action.entry(action.to_string()).or_insert(0) += 1;
    }
    (
        StatusCode::OK,
        Json(json!({ "data": { "total": recent.len(), "by_action": by_action } })),
    )
}

async fn handle_status(
    State(state): State<GatewayState>,
    Path(code): Path<u16>,
) -> (StatusCode, Json<Value>) {
    TestServerStats::inc(&state.stats.requests_total);
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Json(json!({ "status": status.as_u16() })))
}

async fn handle_slow(
    State(state): State<GatewayState>,
    Query(query): Query<HashMap<String, String>>,
) -> &'static str {
    TestServerStats::inc(&state.stats.requests_total);
    let ms = query
        .get("ms")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(50);
    sleep(Duration::from_millis(ms)).await;
    "slow"
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route(PATH_HEALTH, get(handle_health))
        .route(PATH_EVENTS, post(handle_ingest).get(handle_list))
        .route(PATH_EVENTS_BATCH, post(handle_batch))
        .route(PATH_EVENTS_UNACKED, post(handle_ingest_unacked))
        .route(PATH_EVENTS_AGGREGATIONS, get(handle_aggregations))
        .route(PATH_STATUS, get(handle_status))
        .route(PATH_SLOW, get(handle_slow))
        .with_state(state)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(GatewayState::default()).await
    }

    /// Starts a server that answers 401 unless `x-api-key` equals `api_key`.
    pub async fn start_with_api_key(api_key: &str) -> std::io::Result<Self> {
        Self::start_with(GatewayState::new(Some(api_key.to_string()))).await
    }

    async fn start_with(state: GatewayState) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = state.stats.clone();
        let app = router(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
