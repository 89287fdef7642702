use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use scheduler_core::{AgentMessage, EventLevel, ServerMessage};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{CoordinatorClient, DeliverySource, RemoteDebugChannel, TaskDispatcher};
use crate::state::AgentState;

const OUTBOUND_CAPACITY: usize = 64;

enum SessionEnd {
    Shutdown,
    Dropped,
}

/// Persistent socket to the coordinator. A drop never changes the connection
/// state; it schedules one reconnect after the configured delay.
pub struct PushChannel {
    client: Arc<CoordinatorClient>,
    dispatcher: TaskDispatcher,
    remote_debug: Option<Arc<RemoteDebugChannel>>,
    state: Arc<AgentState>,
    reconnect_delay: Duration,
    handshake_timeout: Duration,
}

impl PushChannel {
    pub fn new(
        client: Arc<CoordinatorClient>,
        dispatcher: TaskDispatcher,
        remote_debug: Option<Arc<RemoteDebugChannel>>,
        state: Arc<AgentState>,
        reconnect_delay: Duration,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            client,
            dispatcher,
            remote_debug,
            state,
            reconnect_delay,
            handshake_timeout,
        }
    }

    pub fn start(self, worker_id: String, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(worker_id, shutdown_rx).await })
    }

    async fn run(self, worker_id: String, mut shutdown_rx: broadcast::Receiver<()>) {
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<AgentMessage>(OUTBOUND_CAPACITY);

        loop {
            match self.client.push_channel_request(&worker_id) {
                Ok(request) => {
                    let handshake =
                        tokio::time::timeout(self.handshake_timeout, connect_async(request));
                    let connected = tokio::select! {
                        connected = handshake => Some(connected),
                        _ = shutdown_rx.recv() => None,
                    };
                    match connected {
                        None => break,
                        Some(Ok(Ok((stream, _)))) => {
                            self.state
                                .emit_log(EventLevel::Info, "Push channel connected");
                            let end = self
                                .session(stream, &mut shutdown_rx, &outbound_tx, &mut outbound_rx)
                                .await;
                            if matches!(end, SessionEnd::Shutdown) {
                                break;
                            }
                            self.state.emit_log(
                                EventLevel::Warn,
                                format!(
                                    "Push channel closed, reconnecting in {:?}",
                                    self.reconnect_delay
                                ),
                            );
                        }
                        Some(Ok(Err(e))) => {
                            warn!("Push channel connect failed: {}", e);
                        }
                        Some(Err(_)) => {
                            warn!(
                                "Push channel handshake timed out after {:?}",
                                self.handshake_timeout
                            );
                        }
                    }
                }
                Err(e) => warn!("Cannot build push channel request: {}", e),
            }

            // One pending reconnect at a time; shutdown cancels it.
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {
                    debug!("Reconnecting push channel");
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("Push channel shutting down");
    }

    async fn session<S>(
        &self,
        stream: S,
        shutdown_rx: &mut broadcast::Receiver<()>,
        outbound_tx: &mpsc::Sender<AgentMessage>,
        outbound_rx: &mut mpsc::Receiver<AgentMessage>,
    ) -> SessionEnd
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text, outbound_tx),
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Push channel closed by coordinator: {:?}", frame);
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Push channel read failed: {}", e);
                        return SessionEnd::Dropped;
                    }
                    None => return SessionEnd::Dropped,
                },
                Some(outgoing) = outbound_rx.recv() => {
                    let text = match serde_json::to_string(&outgoing) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode push channel message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::text(text)).await {
                        warn!("Push channel write failed: {}", e);
                        return SessionEnd::Dropped;
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str, outbound_tx: &mpsc::Sender<AgentMessage>) {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring unrecognised push message: {}", e);
                return;
            }
        };

        match message {
            ServerMessage::Ping => {
                if outbound_tx.try_send(AgentMessage::Pong).is_err() {
                    debug!("Outbound queue full, dropping pong");
                }
            }
            ServerMessage::TaskAssignment(assignment) => {
                info!(task_id = %assignment.task_id, "Task assignment received on push channel");
                self.dispatcher.offer(assignment, DeliverySource::Push);
            }
            ServerMessage::RemoteCommand(command) => {
                let Some(remote_debug) = self.remote_debug.as_ref().map(Arc::clone) else {
                    warn!(request_id = %command.request_id, "Remote commands are disabled");
                    return;
                };
                let outbound_tx = outbound_tx.clone();
                tokio::spawn(async move {
                    let result = remote_debug.run(&command).await;
                    if outbound_tx
                        .send(AgentMessage::CommandResult(result))
                        .await
                        .is_err()
                    {
                        debug!("Push channel gone before command result was sent");
                    }
                });
            }
        }
    }
}
