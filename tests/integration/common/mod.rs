//! Shared fixtures: an in-process host that speaks the handler protocol, and
//! helpers to start widgets and the widget server against it.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use codelab_widget::{create_router, Config, HostClient, Widget, WidgetEvent, WidgetHandle, WidgetRegistry};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// Usage id of every widget started by these fixtures.
pub const USAGE_ID: &str = "lab-1";

/// What the fake host has stored and seen.
#[derive(Debug, Default)]
pub struct HostState {
    /// Stored files: name to (content, type tag).
    pub files: BTreeMap<String, (String, String)>,
    /// Number of "processing" answers before a submission finishes.
    pub pending_polls: u32,
    /// Polls received for the current submission.
    pub polls: u32,
    /// Standard output of a finished run when no stdin was sent.
    pub stdout: String,
    /// Handler name and body of each submission.
    pub submissions: Vec<(String, Value)>,
    /// Bodies of feedback requests.
    pub feedback_requests: Vec<Value>,
    /// (filename, content) of each save.
    pub saves: Vec<(String, String)>,
    /// Canned (status, raw body) answers by handler name.
    pub failures: BTreeMap<String, (u16, String)>,
}

/// Handle to a running fake host.
#[derive(Clone)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
    base_url: String,
}

impl FakeHost {
    /// Starts a host serving `state`.
    pub async fn start(state: HostState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let router = Router::new()
            .route("/handler/submit_code_handler", post(submit_code))
            .route("/handler/submit_project", post(submit_project))
            .route("/handler/get_submission_result_handler", post(poll))
            .route("/handler/get_response", post(feedback))
            .route("/handler/create_file", post(create_file))
            .route("/handler/delete_file", post(delete_file))
            .route("/handler/rename_file", post(rename_file))
            .route("/handler/save_file", post(save_file))
            .route("/handler/get_project_structure", post(project_structure))
            .route("/handler/initialize_project", post(initialize_project))
            .route("/handler/reset_handler", post(reset))
            .route("/handler/run_test_cases", post(run_test_cases))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                scripted_failures,
            ))
            .with_state(Arc::clone(&state));

        let addr = serve(router).await;
        Self {
            state,
            base_url: format!("http://{addr}/handler"),
        }
    }

    /// Base URL of the handlers.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Makes `handler` answer with `status` and the raw `body` from now on.
    pub fn fail(&self, handler: &str, status: u16, body: &str) {
        self.state()
            .failures
            .insert(handler.to_string(), (status, body.to_string()));
    }

    /// Locks the host state for inspection.
    pub fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().expect("host state poisoned")
    }
}

/// Host state holding `main.py` with the given content.
pub fn host_with_main(content: &str) -> HostState {
    let mut state = HostState {
        stdout: "Hello from the sandbox\n".to_string(),
        ..HostState::default()
    };
    state
        .files
        .insert("main.py".to_string(), (content.to_string(), "python".to_string()));
    state
}

/// Widget configuration against `host` with short polling windows.
pub fn widget_config(host: &FakeHost) -> Config {
    Config {
        handler_base_url: host.base_url().to_string(),
        usage_id: USAGE_ID.to_string(),
        poll_initial_delay_ms: 20,
        poll_interval_ms: 10,
        auto_save_quiet_ms: 50,
        request_timeout_secs: 5,
        ..Config::default()
    }
}

/// Starts a widget for `config` and loads its stored project.
pub async fn start_widget(config: Config) -> WidgetHandle {
    let client = HostClient::new(&config.handler_base_url, config.request_timeout())
        .expect("Failed to build host client");
    let handle = Widget::new(config, Arc::new(client))
        .expect("Failed to create widget")
        .spawn();
    handle.load().await.expect("Failed to load project");
    handle
}

/// Serves the widget API for `handle` and returns its address.
pub async fn start_server(handle: WidgetHandle) -> SocketAddr {
    let mut registry = WidgetRegistry::new();
    registry.insert(handle);
    serve(create_router(registry)).await
}

/// Receives events until `stop` matches, returning all of them.
pub async fn collect_until(
    events: &mut broadcast::Receiver<WidgetEvent>,
    stop: impl Fn(&WidgetEvent) -> bool,
) -> Vec<WidgetEvent> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("Timeout waiting for widget event")
            .expect("Event channel closed");
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });
    addr
}

// ============================================================================
// Handlers
// ============================================================================

type Shared = State<Arc<Mutex<HostState>>>;

fn lock(state: &Arc<Mutex<HostState>>) -> MutexGuard<'_, HostState> {
    state.lock().expect("host state poisoned")
}

async fn scripted_failures(State(state): Shared, request: Request, next: Next) -> Response {
    let handler = request
        .uri()
        .path()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    let scripted = lock(&state).failures.get(&handler).cloned();
    match scripted {
        Some((status, body)) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, body).into_response()
        }
        None => next.run(request).await,
    }
}

fn record_submission(state: &Arc<Mutex<HostState>>, handler: &str, body: Value) -> Json<Value> {
    let mut host = lock(state);
    host.submissions.push((handler.to_string(), body));
    host.polls = 0;
    Json(json!({"submission_id": format!("token-{}", host.submissions.len())}))
}

async fn submit_code(State(state): Shared, Json(body): Json<Value>) -> Json<Value> {
    record_submission(&state, "submit_code_handler", body)
}

async fn submit_project(State(state): Shared, Json(body): Json<Value>) -> Json<Value> {
    record_submission(&state, "submit_project", body)
}

async fn poll(State(state): Shared, Json(_body): Json<Value>) -> Json<Value> {
    let mut host = lock(&state);
    host.polls += 1;
    if host.polls <= host.pending_polls {
        return Json(json!({"status": {"id": 2, "description": "Processing"}}));
    }
    let stdout = host
        .submissions
        .last()
        .and_then(|(_, body)| body.get("stdin"))
        .and_then(Value::as_str)
        .map_or_else(|| host.stdout.clone(), str::to_string);
    Json(json!({
        "status": {"id": 3, "description": "Accepted"},
        "stdout": stdout,
        "stderr": null,
        "compile_output": null,
        "time": "0.02"
    }))
}

async fn feedback(State(state): Shared, Json(body): Json<Value>) -> Json<Value> {
    lock(&state).feedback_requests.push(body);
    Json(json!({"response": "**Well done.** The output matches."}))
}

fn field(body: &Value, key: &str) -> String {
    body.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

async fn create_file(State(state): Shared, Json(body): Json<Value>) -> Json<Value> {
    let name = field(&body, "filename");
    let mut host = lock(&state);
    if host.files.contains_key(&name) {
        return Json(json!({"success": false, "message": "File already exists"}));
    }
    host.files
        .insert(name, (field(&body, "content"), field(&body, "file_type")));
    Json(json!({"success": true}))
}

async fn delete_file(State(state): Shared, Json(body): Json<Value>) -> Json<Value> {
    let name = field(&body, "filename");
    if name == "main.py" {
        return Json(json!({"success": false, "message": "Cannot delete main file"}));
    }
    let removed = lock(&state).files.remove(&name).is_some();
    Json(json!({"success": removed}))
}

async fn rename_file(State(state): Shared, Json(body): Json<Value>) -> Json<Value> {
    let mut host = lock(&state);
    match host.files.remove(&field(&body, "old_filename")) {
        Some(record) => {
            host.files.insert(field(&body, "new_filename"), record);
            Json(json!({"success": true}))
        }
        None => Json(json!({"success": false, "message": "File not found"})),
    }
}

async fn save_file(State(state): Shared, Json(body): Json<Value>) -> Json<Value> {
    let name = field(&body, "filename");
    let content = field(&body, "content");
    let mut host = lock(&state);
    host.saves.push((name.clone(), content.clone()));
    if let Some(record) = host.files.get_mut(&name) {
        record.0 = content;
    }
    Json(json!({"success": true}))
}

async fn project_structure(State(state): Shared, Json(_body): Json<Value>) -> Json<Value> {
    let host = lock(&state);
    let files: serde_json::Map<String, Value> = host
        .files
        .iter()
        .map(|(name, (content, file_type))| {
            (
                name.clone(),
                json!({"content": content, "type": file_type, "created_at": "2024-01-01T00:00:00.000001"}),
            )
        })
        .collect();
    Json(json!({
        "project_files": files,
        "language": "Python",
        "enable_multi_file": true
    }))
}

async fn initialize_project(State(state): Shared, Json(_body): Json<Value>) -> Json<Value> {
    let created = lock(&state).files.len();
    Json(json!({"success": true, "files_created": created}))
}

async fn reset(State(state): Shared, Json(_body): Json<Value>) -> Json<Value> {
    lock(&state).files.clear();
    Json(json!({"message": "reset successful."}))
}

async fn run_test_cases(Json(_body): Json<Value>) -> Json<Value> {
    Json(json!({"success": true, "message": "No test cases defined", "results": []}))
}
