#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use scheduler_core::{ExecutionMetadata, TaskAssignment, ToolCapability};
use scheduler_worker::{
    AgentTimings, ConnectionSupervisor, CoordinatorClient, SessionManager, ToolAdapter, ToolError,
    ToolOutput, ToolRegistry,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub const API_KEY: &str = "test-key";
pub const WORKER_ID: &str = "worker-1";

#[derive(Default)]
struct Recorded {
    heartbeats: Vec<Value>,
    completed: Vec<Value>,
    failed: Vec<Value>,
    registrations: Vec<Value>,
    agent_messages: Vec<Value>,
    polls: usize,
    api_keys: Vec<String>,
}

#[derive(Clone)]
struct MockState {
    recorded: Arc<Mutex<Recorded>>,
    pull_queue: Arc<Mutex<VecDeque<Value>>>,
    heartbeat_status: Arc<AtomicU16>,
    heartbeat_delay_ms: Arc<AtomicU64>,
    register_status: Arc<AtomicU16>,
    report_status: Arc<AtomicU16>,
    ws_connections: Arc<AtomicUsize>,
    push_tx: broadcast::Sender<String>,
    kick_tx: broadcast::Sender<()>,
}

/// In-process coordinator: HTTP routes plus the worker push socket.
pub struct MockCoordinator {
    pub base_url: String,
    state: MockState,
}

impl MockCoordinator {
    pub async fn spawn() -> Self {
        let (push_tx, _) = broadcast::channel(16);
        let (kick_tx, _) = broadcast::channel(4);
        let state = MockState {
            recorded: Arc::new(Mutex::new(Recorded::default())),
            pull_queue: Arc::new(Mutex::new(VecDeque::new())),
            heartbeat_status: Arc::new(AtomicU16::new(200)),
            heartbeat_delay_ms: Arc::new(AtomicU64::new(0)),
            register_status: Arc::new(AtomicU16::new(200)),
            report_status: Arc::new(AtomicU16::new(200)),
            ws_connections: Arc::new(AtomicUsize::new(0)),
            push_tx,
            kick_tx,
        };

        let app = Router::new()
            .route("/auth/login", post(login))
            .route("/workers/register", post(register))
            .route("/workers/{id}/heartbeat", post(heartbeat))
            .route("/workers/{id}/pull-task", get(pull_task))
            .route("/workers/{id}/task-complete", post(task_complete))
            .route("/workers/{id}/task-failed", post(task_failed))
            .route("/workers/{id}/ws", get(push_socket))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    fn recorded<T>(&self, read: impl FnOnce(&Recorded) -> T) -> T {
        read(&self.state.recorded.lock().unwrap())
    }

    pub fn heartbeats(&self) -> Vec<Value> {
        self.recorded(|r| r.heartbeats.clone())
    }

    pub fn completed(&self) -> Vec<Value> {
        self.recorded(|r| r.completed.clone())
    }

    pub fn failed(&self) -> Vec<Value> {
        self.recorded(|r| r.failed.clone())
    }

    pub fn registrations(&self) -> Vec<Value> {
        self.recorded(|r| r.registrations.clone())
    }

    pub fn agent_messages(&self) -> Vec<Value> {
        self.recorded(|r| r.agent_messages.clone())
    }

    pub fn polls(&self) -> usize {
        self.recorded(|r| r.polls)
    }

    pub fn api_keys(&self) -> Vec<String> {
        self.recorded(|r| r.api_keys.clone())
    }

    pub fn ws_connections(&self) -> usize {
        self.state.ws_connections.load(Ordering::SeqCst)
    }

    pub fn set_heartbeat_status(&self, status: u16) {
        self.state.heartbeat_status.store(status, Ordering::SeqCst);
    }

    /// Heartbeats are recorded on arrival and answered after `delay`.
    pub fn set_heartbeat_delay(&self, delay: Duration) {
        self.state
            .heartbeat_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Status for both task-complete and task-failed.
    pub fn set_report_status(&self, status: u16) {
        self.state.report_status.store(status, Ordering::SeqCst);
    }

    pub fn set_register_status(&self, status: u16) {
        self.state.register_status.store(status, Ordering::SeqCst);
    }

    pub fn enqueue_task(&self, task: Value) {
        self.state.pull_queue.lock().unwrap().push_back(task);
    }

    pub fn pending_pull_tasks(&self) -> usize {
        self.state.pull_queue.lock().unwrap().len()
    }

    /// Send a message to every connected agent socket.
    pub fn push(&self, message: Value) {
        let _ = self.state.push_tx.send(message.to_string());
    }

    /// Close every open agent socket from the server side.
    pub fn drop_connections(&self) {
        let _ = self.state.kick_tx.send(());
    }
}

fn record_key(state: &MockState, headers: &axum::http::HeaderMap) {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        state.recorded.lock().unwrap().api_keys.push(key.to_string());
    }
}

async fn login() -> Json<Value> {
    Json(json!({"token": "session-token", "refresh_token": "refresh-token"}))
}

async fn register(
    State(state): State<MockState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_key(&state, &headers);
    state.recorded.lock().unwrap().registrations.push(body);
    let status = state.register_status.load(Ordering::SeqCst);
    if status != 200 {
        let code = StatusCode::from_u16(status).unwrap();
        return (code, "registration refused").into_response();
    }
    Json(json!({"workerId": WORKER_ID})).into_response()
}

async fn heartbeat(
    State(state): State<MockState>,
    Path(_id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.recorded.lock().unwrap().heartbeats.push(body);
    let delay = state.heartbeat_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    StatusCode::from_u16(state.heartbeat_status.load(Ordering::SeqCst)).unwrap()
}

async fn pull_task(State(state): State<MockState>, Path(_id): Path<String>) -> Response {
    state.recorded.lock().unwrap().polls += 1;
    match state.pull_queue.lock().unwrap().pop_front() {
        Some(task) => Json(task).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn task_complete(
    State(state): State<MockState>,
    Path(_id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.recorded.lock().unwrap().completed.push(body);
    StatusCode::from_u16(state.report_status.load(Ordering::SeqCst)).unwrap()
}

async fn task_failed(
    State(state): State<MockState>,
    Path(_id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.recorded.lock().unwrap().failed.push(body);
    StatusCode::from_u16(state.report_status.load(Ordering::SeqCst)).unwrap()
}

async fn push_socket(
    ws: WebSocketUpgrade,
    State(state): State<MockState>,
    headers: axum::http::HeaderMap,
) -> Response {
    record_key(&state, &headers);
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: MockState) {
    let mut push_rx = state.push_tx.subscribe();
    let mut kick_rx = state.kick_tx.subscribe();
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outgoing = push_rx.recv() => match outgoing {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        state.recorded.lock().unwrap().agent_messages.push(value);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = kick_rx.recv() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Poll `condition` every 20ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

pub fn fast_timings() -> AgentTimings {
    AgentTimings {
        heartbeat_interval: Duration::from_millis(100),
        poll_interval: Duration::from_millis(100),
        reconnect_delay: Duration::from_millis(200),
        shutdown_grace: Duration::from_millis(500),
        request_timeout: Duration::from_secs(2),
        debug_command_timeout: Duration::from_secs(5),
        report_retries: 3,
    }
}

pub fn supervisor(
    coordinator: &MockCoordinator,
    api_key: Option<&str>,
    tools: Vec<Arc<dyn ToolAdapter>>,
    timings: AgentTimings,
) -> ConnectionSupervisor {
    let client = CoordinatorClient::new(
        &coordinator.base_url,
        api_key.map(str::to_string),
        timings.request_timeout,
    )
    .unwrap();
    let identity = Arc::new(scheduler_core::WorkerIdentity::new("test-host-0123456789abcdef"));
    let session = Arc::new(SessionManager::new(Arc::new(client), identity));

    let mut registry = ToolRegistry::new(Duration::from_secs(2));
    for tool in tools {
        registry.register(tool);
    }
    ConnectionSupervisor::new(session, Arc::new(registry), timings)
}

/// Echoes the description back.
pub struct EchoTool;

#[async_trait]
impl ToolAdapter for EchoTool {
    fn id(&self) -> &str {
        "echoTool"
    }

    fn display_name(&self) -> &str {
        "Echo"
    }

    async fn probe(&self) -> ToolCapability {
        ToolCapability::available("echoTool", "Echo", Some("1.0".to_string()))
    }

    async fn run(&self, assignment: &TaskAssignment) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput {
            output: assignment.description.clone(),
            metadata: ExecutionMetadata::Cli {
                tool: "echoTool".to_string(),
                duration_ms: 0,
                exit_code: Some(0),
            },
        })
    }
}

/// Takes `delay` per run and records how many runs overlap.
pub struct SlowTool {
    pub delay: Duration,
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub runs: AtomicUsize,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ToolAdapter for SlowTool {
    fn id(&self) -> &str {
        "slowTool"
    }

    fn display_name(&self) -> &str {
        "Slow"
    }

    async fn probe(&self) -> ToolCapability {
        ToolCapability::available("slowTool", "Slow", None)
    }

    async fn run(&self, assignment: &TaskAssignment) -> Result<ToolOutput, ToolError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(ToolOutput {
            output: format!("slow {}", assignment.task_id),
            metadata: ExecutionMetadata::Cli {
                tool: "slowTool".to_string(),
                duration_ms: self.delay.as_millis() as u64,
                exit_code: Some(0),
            },
        })
    }
}

/// Probes as unavailable.
pub struct MissingTool;

#[async_trait]
impl ToolAdapter for MissingTool {
    fn id(&self) -> &str {
        "missingTool"
    }

    fn display_name(&self) -> &str {
        "Missing"
    }

    async fn probe(&self) -> ToolCapability {
        ToolCapability::unavailable("missingTool", "Missing")
    }

    async fn run(&self, _assignment: &TaskAssignment) -> Result<ToolOutput, ToolError> {
        Err(ToolError::Unavailable("missingTool is not installed".to_string()))
    }
}

pub fn task_assignment(task_id: &str, description: &str, tool_hint: &str) -> Value {
    json!({
        "type": "task_assignment",
        "taskId": task_id,
        "description": description,
        "toolHint": tool_hint,
        "context": {}
    })
}
