use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use scheduler_core::{
    AgentConfig, AgentError, AgentEvent, AgentResult, ConnectionState, EventLevel,
    ToolCapability, WorkerIdentity,
};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{
    start_task_consumer, CoordinatorClient, DeliverySource, HeartbeatManager, PushChannel,
    RemoteDebugChannel, SessionManager, TaskDispatcher, TaskExecutor,
};
use crate::identity::resolve_machine_id;
use crate::resources::{system_info, ResourceSampler};
use crate::state::AgentState;
use crate::timings::AgentTimings;
use crate::tools::ToolRegistry;

const STOP_JOIN_MARGIN: Duration = Duration::from_millis(500);
const OFFLINE_HEARTBEAT_LIMIT: Duration = Duration::from_secs(1);

/// Read-only projection for the hosting shell.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub state: ConnectionState,
    pub machine_id: String,
    pub worker_id: Option<String>,
    pub current_task: Option<String>,
    pub capabilities: Vec<ToolCapability>,
}

struct RunningWorker {
    worker_id: String,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
    heartbeat: Arc<HeartbeatManager>,
}

/// Owns the lifecycle state machine and the background loops: heartbeat,
/// push channel, pull poller and the task consumer.
pub struct ConnectionSupervisor {
    session: Arc<SessionManager>,
    registry: Arc<ToolRegistry>,
    remote_debug: Option<Arc<RemoteDebugChannel>>,
    state: Arc<AgentState>,
    sampler: ResourceSampler,
    timings: AgentTimings,
    running: Mutex<Option<RunningWorker>>,
}

impl ConnectionSupervisor {
    pub fn new(
        session: Arc<SessionManager>,
        registry: Arc<ToolRegistry>,
        timings: AgentTimings,
    ) -> Self {
        Self {
            session,
            registry,
            remote_debug: None,
            state: Arc::new(AgentState::new()),
            sampler: ResourceSampler::new(),
            timings,
            running: Mutex::new(None),
        }
    }

    pub fn with_remote_debug(mut self, remote_debug: Option<RemoteDebugChannel>) -> Self {
        self.remote_debug = remote_debug.map(Arc::new);
        self
    }

    /// Wire up the built-in tools, the coordinator client and this host's identity.
    pub fn from_config(config: &AgentConfig) -> AgentResult<Self> {
        let timings = AgentTimings::from(config);
        let client = CoordinatorClient::new(
            &config.coordinator.base_url,
            config.coordinator.api_key.clone(),
            timings.request_timeout,
        )?;
        let identity = Arc::new(WorkerIdentity::new(resolve_machine_id()));
        let session = Arc::new(SessionManager::new(Arc::new(client), identity));
        let registry = Arc::new(ToolRegistry::from_config(&config.tools));
        // `None` when remote commands are disabled.
        let remote_debug = config.debug.enabled.then(|| {
            RemoteDebugChannel::new(&config.debug.shell, timings.debug_command_timeout)
        });

        Ok(Self::new(session, registry, timings).with_remote_debug(remote_debug))
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn remote_debug(&self) -> Option<&RemoteDebugChannel> {
        self.remote_debug.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.connection_state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.watch_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.state.subscribe()
    }

    pub fn current_task(&self) -> Option<String> {
        self.state.current_task()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn status(&self) -> WorkerStatus {
        let identity = self.session.identity();
        WorkerStatus {
            state: self.state(),
            machine_id: identity.machine_id().to_string(),
            worker_id: identity.worker_id().map(str::to_string),
            current_task: self.current_task(),
            capabilities: self.registry.capabilities().await,
        }
    }

    /// Probe tools, register and start the background loops. Startup failures
    /// leave the agent in `error` and are returned to the caller.
    pub async fn start(&self) -> AgentResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(AgentError::AlreadyRunning);
        }

        self.state.transition(ConnectionState::Connecting)?;
        self.state
            .emit_log(EventLevel::Info, "Connecting to coordinator");

        let worker_id = match self.register().await {
            Ok(worker_id) => worker_id,
            Err(e) => {
                if let Err(transition) = self.state.transition(ConnectionState::Error) {
                    warn!("{}", transition);
                }
                self.state
                    .emit_log(EventLevel::Error, format!("Worker failed to start: {e}"));
                return Err(e);
            }
        };

        self.state.transition(ConnectionState::Online)?;
        *running = Some(self.spawn_loops(worker_id.clone()));
        self.state
            .emit_log(EventLevel::Info, format!("Worker {worker_id} online"));
        Ok(())
    }

    async fn register(&self) -> AgentResult<String> {
        if !self.session.is_authenticated() {
            return Err(AgentError::NotAuthenticated);
        }

        let capabilities = self.registry.probe_all().await;
        if !capabilities.iter().any(|c| c.available) {
            return Err(AgentError::NoToolsAvailable);
        }

        let host = tokio::task::spawn_blocking(system_info)
            .await
            .map_err(|e| AgentError::Internal(format!("system info task failed: {e}")))?;
        self.session.register(capabilities, host).await
    }

    fn spawn_loops(&self, worker_id: String) -> RunningWorker {
        let (shutdown_tx, _) = broadcast::channel(1);
        let client = Arc::clone(self.session.client());
        let (dispatcher, receiver) = TaskDispatcher::channel(Arc::clone(&self.state));

        let heartbeat = Arc::new(HeartbeatManager::new(
            Arc::clone(&client),
            Arc::clone(&self.state),
            self.sampler.clone(),
            self.timings.heartbeat_interval,
        ));
        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.state),
        ));
        let push_channel = PushChannel::new(
            Arc::clone(&client),
            dispatcher.clone(),
            self.remote_debug.clone(),
            Arc::clone(&self.state),
            self.timings.reconnect_delay,
            self.timings.request_timeout,
        );

        let handles = vec![
            heartbeat.start_heartbeat_task(worker_id.clone(), shutdown_tx.subscribe()),
            start_task_consumer(
                executor,
                Arc::clone(&client),
                worker_id.clone(),
                receiver,
                shutdown_tx.subscribe(),
                self.timings.report_retries,
                self.timings.shutdown_grace,
            ),
            push_channel.start(worker_id.clone(), shutdown_tx.subscribe()),
            self.start_task_polling(client, dispatcher, worker_id.clone(), shutdown_tx.subscribe()),
        ];

        RunningWorker {
            worker_id,
            shutdown_tx,
            handles,
            heartbeat,
        }
    }

    /// Pull one task per tick while idle. A busy slot skips the request entirely.
    fn start_task_polling(
        &self,
        client: Arc<CoordinatorClient>,
        dispatcher: TaskDispatcher,
        worker_id: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let mut poll_interval = interval(self.timings.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = poll_interval.tick() => {
                        if state.slot().is_busy() {
                            debug!("Task in flight, skipping poll");
                            continue;
                        }
                        match client.pull_task(&worker_id).await {
                            Ok(Some(assignment)) => {
                                info!(task_id = %assignment.task_id, "Task assignment received from poll");
                                dispatcher.offer(assignment, DeliverySource::Pull);
                            }
                            Ok(None) => debug!("No task available"),
                            Err(e) => warn!("Task poll failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Task polling shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Cancel every loop, send a best-effort offline heartbeat and settle in
    /// `disconnected`. Safe to call repeatedly.
    pub async fn stop(&self) -> AgentResult<()> {
        let mut running = self.running.lock().await;
        let Some(worker) = running.take() else {
            if self.state() == ConnectionState::Error {
                self.state.transition(ConnectionState::Disconnected)?;
            }
            return Ok(());
        };

        info!("Stopping worker {}", worker.worker_id);
        let _ = worker.shutdown_tx.send(());

        let grace = self.timings.shutdown_grace;
        let aborts: Vec<_> = worker.handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(grace + STOP_JOIN_MARGIN, join_all(worker.handles))
            .await
            .is_err()
        {
            warn!("Background loops did not stop within {:?}, aborting", grace);
            for abort in aborts {
                abort.abort();
            }
        }

        worker
            .heartbeat
            .send_offline(&worker.worker_id, grace.min(OFFLINE_HEARTBEAT_LIMIT))
            .await;

        self.state.transition(ConnectionState::Disconnected)?;
        self.state.emit_log(
            EventLevel::Info,
            format!("Worker {} stopped", worker.worker_id),
        );
        Ok(())
    }
}
