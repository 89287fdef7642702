use std::sync::Arc;
use std::time::Duration;

use scheduler_core::{AgentResult, HeartbeatPayload, WorkerStatusLabel};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::CoordinatorClient;
use crate::resources::ResourceSampler;
use crate::state::AgentState;

pub struct HeartbeatManager {
    client: Arc<CoordinatorClient>,
    state: Arc<AgentState>,
    sampler: ResourceSampler,
    heartbeat_interval: Duration,
}

impl HeartbeatManager {
    pub fn new(
        client: Arc<CoordinatorClient>,
        state: Arc<AgentState>,
        sampler: ResourceSampler,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            client,
            state,
            sampler,
            heartbeat_interval,
        }
    }

    /// Sample resources and post one heartbeat; the label follows the task slot.
    pub async fn send_heartbeat(&self, worker_id: &str) -> AgentResult<()> {
        let current_task = self.state.current_task();
        let status = WorkerStatusLabel::from_current_task(current_task.as_deref());
        self.post(worker_id, status, current_task).await
    }

    /// Final `offline` heartbeat, given at most `limit`. Failures are swallowed.
    pub async fn send_offline(&self, worker_id: &str, limit: Duration) {
        match tokio::time::timeout(limit, self.post(worker_id, WorkerStatusLabel::Offline, None)).await
        {
            Ok(Ok(())) => debug!("Offline heartbeat sent for worker {}", worker_id),
            Ok(Err(e)) => debug!("Offline heartbeat failed: {}", e),
            Err(_) => debug!("Offline heartbeat timed out after {:?}", limit),
        }
    }

    async fn post(
        &self,
        worker_id: &str,
        status: WorkerStatusLabel,
        current_task: Option<String>,
    ) -> AgentResult<()> {
        let usage = self.sampler.sample().await;
        let payload = HeartbeatPayload::new(status, usage, current_task);
        self.client.send_heartbeat(worker_id, &payload).await
    }

    /// Tick until shutdown. A failed post is logged and the next tick still fires.
    pub fn start_heartbeat_task(
        self: &Arc<Self>,
        worker_id: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut heartbeat_interval = interval(self.heartbeat_interval);
        heartbeat_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = heartbeat_interval.tick() => {
                        tokio::select! {
                            sent = manager.send_heartbeat(&worker_id) => {
                                if let Err(e) = sent {
                                    warn!("Failed to send heartbeat: {}", e);
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                info!("Heartbeat task shutting down");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Heartbeat task shutting down");
                        break;
                    }
                }
            }
        })
    }
}
