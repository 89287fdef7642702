use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use scheduler_core::{EventLevel, TaskAssignment, TaskReport, TaskResult};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::CoordinatorClient;
use crate::state::{AgentState, ClaimRejection, SlotGuard};
use crate::tools::ToolRegistry;

/// Channel a task assignment arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySource {
    Push,
    Pull,
}

impl fmt::Display for DeliverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliverySource::Push => write!(f, "push"),
            DeliverySource::Pull => write!(f, "pull"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferOutcome {
    Accepted,
    Rejected(ClaimRejection),
    Closed,
}

/// Runs one assignment through the resolved tool adapter.
pub struct TaskExecutor {
    registry: Arc<ToolRegistry>,
    state: Arc<AgentState>,
}

/// Returns the agent to `online` however execution ends, including when the
/// future is dropped mid-run.
struct BusyGuard<'a> {
    state: &'a AgentState,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.state.leave_busy();
    }
}

impl TaskExecutor {
    pub fn new(registry: Arc<ToolRegistry>, state: Arc<AgentState>) -> Self {
        Self { registry, state }
    }

    /// Tool errors never escape: they become a `Failure` result.
    pub async fn execute(&self, assignment: &TaskAssignment) -> TaskResult {
        self.state.enter_busy();
        let _busy = BusyGuard { state: &self.state };

        let tool = match self.registry.resolve(assignment.tool_hint()).await {
            Ok(tool) => tool,
            Err(e) => {
                warn!(task_id = %assignment.task_id, "Cannot run task: {}", e);
                return TaskResult::failure(&assignment.task_id, e.to_string());
            }
        };

        info!(
            task_id = %assignment.task_id,
            tool = %tool.id(),
            "Executing task"
        );
        match tool.run(assignment).await {
            Ok(output) => {
                info!(
                    task_id = %assignment.task_id,
                    tool = %tool.id(),
                    "Task completed in {}ms",
                    output.metadata.duration_ms()
                );
                TaskResult::success(&assignment.task_id, output.output, output.metadata)
            }
            Err(e) => {
                let verdict = if e.is_timeout() { "timed out" } else { "failed" };
                error!(task_id = %assignment.task_id, tool = %tool.id(), "Task {}: {}", verdict, e);
                TaskResult::failure(&assignment.task_id, e.to_string())
            }
        }
    }
}

pub type ClaimedTask = (SlotGuard, TaskAssignment);

/// Entry point for deliveries from both channels. Claims the single-flight slot
/// and hands the assignment to the consumer loop.
#[derive(Clone)]
pub struct TaskDispatcher {
    state: Arc<AgentState>,
    sender: mpsc::Sender<ClaimedTask>,
}

impl TaskDispatcher {
    pub fn channel(state: Arc<AgentState>) -> (Self, mpsc::Receiver<ClaimedTask>) {
        let (sender, receiver) = mpsc::channel(1);
        (Self { state, sender }, receiver)
    }

    pub fn offer(&self, assignment: TaskAssignment, source: DeliverySource) -> OfferOutcome {
        let guard = match self.state.slot().try_claim(&assignment.task_id) {
            Ok(guard) => guard,
            Err(rejection) => {
                let message = match &rejection {
                    ClaimRejection::Busy { current } => format!(
                        "Rejected task {} from {} channel: task {} is in flight",
                        assignment.task_id, source, current
                    ),
                    ClaimRejection::RecentlyCompleted => format!(
                        "Ignored task {} from {} channel: already executed",
                        assignment.task_id, source
                    ),
                };
                self.state.emit_log(EventLevel::Warn, message);
                return OfferOutcome::Rejected(rejection);
            }
        };

        debug!(task_id = %assignment.task_id, "Claimed task slot via {} channel", source);
        match self.sender.try_send((guard, assignment)) {
            Ok(()) => OfferOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full((_, assignment))) => {
                warn!(task_id = %assignment.task_id, "Executor queue full, dropping task");
                OfferOutcome::Rejected(ClaimRejection::Busy {
                    current: self.state.current_task().unwrap_or_default(),
                })
            }
            Err(mpsc::error::TrySendError::Closed((_, assignment))) => {
                debug!(task_id = %assignment.task_id, "Executor stopped, dropping task");
                OfferOutcome::Closed
            }
        }
    }
}

/// Single consumer: executes claimed assignments one at a time and reports each
/// result. On shutdown an in-flight execution is dropped and reported as failed.
pub fn start_task_consumer(
    executor: Arc<TaskExecutor>,
    client: Arc<CoordinatorClient>,
    worker_id: String,
    mut receiver: mpsc::Receiver<ClaimedTask>,
    mut shutdown_rx: broadcast::Receiver<()>,
    report_retries: u32,
    shutdown_grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (guard, assignment) = tokio::select! {
                claimed = receiver.recv() => match claimed {
                    Some(claimed) => claimed,
                    None => break,
                },
                _ = shutdown_rx.recv() => break,
            };

            let mut execution = Box::pin(executor.execute(&assignment));

            let outcome = tokio::select! {
                result = &mut execution => Some(result),
                _ = shutdown_rx.recv() => None,
            };

            match outcome {
                Some(result) => {
                    guard.finish();
                    let report = TaskReport::from(&result);
                    if let Err(e) = client
                        .report_with_retry(&worker_id, &report, report_retries)
                        .await
                    {
                        error!(task_id = %assignment.task_id, "Result not delivered: {}", e);
                    }
                }
                None => {
                    warn!(task_id = %assignment.task_id, "Worker stopping, cancelling task");
                    drop(execution);
                    let result = TaskResult::failure(
                        &assignment.task_id,
                        "worker stopped before the task finished",
                    );
                    let report = TaskReport::from(&result);
                    match tokio::time::timeout(shutdown_grace, client.report(&worker_id, &report)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!("Cancellation report failed: {}", e),
                        Err(_) => debug!("Cancellation report timed out"),
                    }
                    guard.finish();
                    break;
                }
            }
        }
        info!("Task consumer shutting down");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scheduler_core::{ConnectionState, ExecutionMetadata, ToolCapability};

    use crate::tools::{ToolAdapter, ToolError, ToolOutput};

    struct EchoTool;

    #[async_trait]
    impl ToolAdapter for EchoTool {
        fn id(&self) -> &str {
            "echoTool"
        }

        fn display_name(&self) -> &str {
            "Echo"
        }

        async fn probe(&self) -> ToolCapability {
            ToolCapability::available("echoTool", "Echo", None)
        }

        async fn run(&self, assignment: &TaskAssignment) -> Result<ToolOutput, ToolError> {
            if assignment.description == "fail" {
                return Err(ToolError::NonZeroExit {
                    tool: "echoTool".to_string(),
                    code: Some(1),
                    stderr: "asked to fail".to_string(),
                });
            }
            Ok(ToolOutput {
                output: assignment.description.clone(),
                metadata: ExecutionMetadata::Cli {
                    tool: "echoTool".to_string(),
                    duration_ms: 1,
                    exit_code: Some(0),
                },
            })
        }
    }

    async fn online_executor() -> (Arc<AgentState>, TaskExecutor) {
        let state = Arc::new(AgentState::new());
        state.transition(ConnectionState::Connecting).unwrap();
        state.transition(ConnectionState::Online).unwrap();

        let registry = Arc::new(
            ToolRegistry::new(Duration::from_secs(1)).with_adapter(Arc::new(EchoTool)),
        );
        registry.probe_all().await;
        (Arc::clone(&state), TaskExecutor::new(registry, state))
    }

    #[tokio::test]
    async fn execute_returns_success_and_restores_online() {
        let (state, executor) = online_executor().await;
        let mut watch = state.watch_state();

        let result = executor
            .execute(&TaskAssignment::new("t1", "hello").with_tool_hint("echoTool"))
            .await;

        assert!(result.is_success());
        assert_eq!(state.connection_state(), ConnectionState::Online);
        assert!(watch.has_changed().unwrap());
        assert_eq!(*watch.borrow_and_update(), ConnectionState::Online);
    }

    #[tokio::test]
    async fn tool_error_becomes_failure() {
        let (state, executor) = online_executor().await;
        let result = executor.execute(&TaskAssignment::new("t2", "fail")).await;

        assert!(!result.is_success());
        assert!(result.error_message().unwrap().contains("asked to fail"));
        assert_eq!(state.connection_state(), ConnectionState::Online);
    }

    #[tokio::test]
    async fn unknown_tool_is_failure_not_panic() {
        let (_, executor) = online_executor().await;
        let result = executor
            .execute(&TaskAssignment::new("t3", "x").with_tool_hint("nonexistent"))
            .await;
        assert!(result.error_message().unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn dispatcher_rejects_second_assignment_while_first_is_claimed() {
        let state = Arc::new(AgentState::new());
        let (dispatcher, mut receiver) = TaskDispatcher::channel(Arc::clone(&state));
        let mut events = state.subscribe();

        assert_eq!(
            dispatcher.offer(TaskAssignment::new("t1", "a"), DeliverySource::Pull),
            OfferOutcome::Accepted
        );
        assert_eq!(
            dispatcher.offer(TaskAssignment::new("t2", "b"), DeliverySource::Push),
            OfferOutcome::Rejected(ClaimRejection::Busy {
                current: "t1".to_string()
            })
        );
        assert!(matches!(
            events.try_recv(),
            Ok(scheduler_core::AgentEvent::LogEmitted {
                level: EventLevel::Warn,
                ..
            })
        ));

        let (guard, assignment) = receiver.recv().await.unwrap();
        assert_eq!(assignment.task_id, "t1");
        guard.finish();

        assert_eq!(
            dispatcher.offer(TaskAssignment::new("t1", "a"), DeliverySource::Push),
            OfferOutcome::Rejected(ClaimRejection::RecentlyCompleted)
        );
        assert_eq!(
            dispatcher.offer(TaskAssignment::new("t2", "b"), DeliverySource::Push),
            OfferOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn offer_after_consumer_stops_releases_slot() {
        let state = Arc::new(AgentState::new());
        let (dispatcher, receiver) = TaskDispatcher::channel(Arc::clone(&state));
        drop(receiver);

        assert_eq!(
            dispatcher.offer(TaskAssignment::new("t1", "a"), DeliverySource::Push),
            OfferOutcome::Closed
        );
        assert!(!state.slot().is_busy());
    }
}
