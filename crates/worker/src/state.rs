//! Agent-wide state: connection state machine, host events and the
//! single-flight task slot.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use scheduler_core::{AgentError, AgentEvent, AgentResult, ConnectionState, EventLevel};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const RECENT_TASK_HISTORY: usize = 64;

pub struct AgentState {
    connection: watch::Sender<ConnectionState>,
    events: broadcast::Sender<AgentEvent>,
    slot: TaskSlot,
}

impl AgentState {
    pub fn new() -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            connection,
            events,
            slot: TaskSlot::default(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn slot(&self) -> &TaskSlot {
        &self.slot
    }

    pub fn current_task(&self) -> Option<String> {
        self.slot.current()
    }

    /// Apply a validated transition. A transition to the current state is a no-op.
    pub(crate) fn transition(&self, next: ConnectionState) -> AgentResult<()> {
        let mut rejected = None;
        let changed = self.connection.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                rejected = Some(*current);
                return false;
            }
            *current = next;
            true
        });

        if let Some(from) = rejected {
            return Err(AgentError::InvalidTransition { from, to: next });
        }
        if changed {
            debug!("Connection state -> {}", next);
            let _ = self.events.send(AgentEvent::StatusChanged { state: next });
        }
        Ok(())
    }

    /// Online -> Busy; returns false (and changes nothing) in any other state.
    pub(crate) fn enter_busy(&self) -> bool {
        self.toggle(ConnectionState::Online, ConnectionState::Busy)
    }

    /// Busy -> Online; a no-op once the agent has stopped.
    pub(crate) fn leave_busy(&self) -> bool {
        self.toggle(ConnectionState::Busy, ConnectionState::Online)
    }

    fn toggle(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let changed = self.connection.send_if_modified(|current| {
            if *current != from {
                return false;
            }
            *current = to;
            true
        });
        if changed {
            let _ = self.events.send(AgentEvent::StatusChanged { state: to });
        }
        changed
    }

    /// Log through tracing and publish a `log-emitted` event for the host.
    pub fn emit_log(&self, level: EventLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            EventLevel::Info => info!("{}", message),
            EventLevel::Warn => warn!("{}", message),
            EventLevel::Error => error!("{}", message),
        }
        let _ = self.events.send(AgentEvent::log(level, message));
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a delivery could not claim the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimRejection {
    Busy { current: String },
    RecentlyCompleted,
}

#[derive(Debug, Default)]
struct SlotInner {
    current: Option<String>,
    recent: VecDeque<String>,
}

/// Holds the id of the one task allowed in flight.
#[derive(Debug, Clone, Default)]
pub struct TaskSlot {
    inner: Arc<Mutex<SlotInner>>,
}

impl TaskSlot {
    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomically claim the slot for `task_id`. The returned guard frees it on drop.
    pub fn try_claim(&self, task_id: &str) -> Result<SlotGuard, ClaimRejection> {
        let mut inner = self.lock();
        if let Some(current) = &inner.current {
            return Err(ClaimRejection::Busy {
                current: current.clone(),
            });
        }
        if inner.recent.iter().any(|id| id == task_id) {
            return Err(ClaimRejection::RecentlyCompleted);
        }
        inner.current = Some(task_id.to_string());
        Ok(SlotGuard {
            slot: self.clone(),
            task_id: task_id.to_string(),
            finished: false,
        })
    }

    pub fn current(&self) -> Option<String> {
        self.lock().current.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().current.is_some()
    }

    fn release(&self, task_id: &str, finished: bool) {
        let mut inner = self.lock();
        if inner.current.as_deref() == Some(task_id) {
            inner.current = None;
        }
        if finished {
            if inner.recent.len() == RECENT_TASK_HISTORY {
                inner.recent.pop_front();
            }
            inner.recent.push_back(task_id.to_string());
        }
    }
}

/// Proof of ownership of the task slot.
#[derive(Debug)]
pub struct SlotGuard {
    slot: TaskSlot,
    task_id: String,
    finished: bool,
}

impl SlotGuard {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Record the task as done so a re-delivery of the same id is ignored.
    pub fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot.release(&self.task_id, self.finished);
    }
}
