//! Federation output: a filtered one-way event stream to an upstream hub.
//!
//! Subscribes to the configured subjects, applies the declarative filter,
//! and forwards passing messages over a WebSocket. While the remote is
//! unreachable the component buffers locally (bounded, oldest dropped),
//! reconnects with capped exponential backoff, and re-emits the buffer on
//! recovery — at-least-once toward the hub.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use semstreams_bus::DeliveryMode;
use semstreams_flow::{Component, ComponentContext, ComponentKind, FlowError, Health};
use semstreams_msg::Message;

use crate::filter::FilterSpec;

/// Federation output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationOutputConfig {
    /// Remote hub URL (`ws://…` or `wss://…`; TLS is transparent here).
    pub url: String,
    /// Subjects to forward.
    pub subscribe_subjects: Vec<String>,
    /// Declarative filter; empty forwards everything.
    pub filter: FilterSpec,
    /// Local buffer size while disconnected.
    pub buffer_capacity: usize,
    /// Initial reconnect backoff in milliseconds.
    pub backoff_initial_ms: u64,
    /// Backoff cap in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for FederationOutputConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8443/federation".into(),
            subscribe_subjects: vec!["events.>".into()],
            filter: FilterSpec::default(),
            buffer_capacity: 1_024,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// The federation WebSocket output component.
pub struct FederationOutput {
    name: String,
    config: FederationOutputConfig,
    connected: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl FederationOutput {
    /// Build the component.
    #[must_use]
    pub fn new(name: impl Into<String>, config: FederationOutputConfig) -> Self {
        Self {
            name: name.into(),
            config,
            connected: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    /// The uplink loop: connect, drain buffer, forward live traffic; on any
    /// failure fall back to buffering and reconnect with backoff.
    async fn run_uplink(
        config: FederationOutputConfig,
        connected: Arc<AtomicBool>,
        mut queue: mpsc::Receiver<Message>,
    ) {
        let mut buffer: VecDeque<Message> = VecDeque::new();
        let mut backoff = Duration::from_millis(config.backoff_initial_ms);
        let backoff_max = Duration::from_millis(config.backoff_max_ms);

        loop {
            let mut socket = match connect_async(config.url.as_str()).await {
                Ok((socket, _response)) => {
                    info!(url = config.url, "federation uplink connected");
                    connected.store(true, Ordering::Relaxed);
                    backoff = Duration::from_millis(config.backoff_initial_ms);
                    socket
                }
                Err(error) => {
                    connected.store(false, Ordering::Relaxed);
                    debug!(url = config.url, %error, "federation connect failed");
                    // Keep absorbing traffic into the buffer while backing off.
                    let deadline = tokio::time::sleep(backoff);
                    tokio::pin!(deadline);
                    loop {
                        tokio::select! {
                            () = &mut deadline => break,
                            next = queue.recv() => match next {
                                Some(message) => {
                                    Self::buffer_push(&mut buffer, config.buffer_capacity, message);
                                }
                                None => return,
                            },
                        }
                    }
                    backoff = (backoff * 2).min(backoff_max);
                    continue;
                }
            };

            // Re-emit everything buffered while we were away.
            let mut failed = false;
            while let Some(message) = buffer.pop_front() {
                if let Err(error) = Self::send(&mut socket, &message).await {
                    warn!(%error, "uplink lost while draining buffer");
                    buffer.push_front(message);
                    failed = true;
                    break;
                }
            }
            if failed {
                connected.store(false, Ordering::Relaxed);
                continue;
            }

            // Live forwarding until the socket breaks or the flow stops.
            loop {
                match queue.recv().await {
                    Some(message) => {
                        if let Err(error) = Self::send(&mut socket, &message).await {
                            warn!(%error, "uplink lost, buffering");
                            Self::buffer_push(&mut buffer, config.buffer_capacity, message);
                            connected.store(false, Ordering::Relaxed);
                            break;
                        }
                    }
                    None => {
                        let _ = socket.close(None).await;
                        return;
                    }
                }
            }
        }
    }

    fn buffer_push(buffer: &mut VecDeque<Message>, capacity: usize, message: Message) {
        if buffer.len() >= capacity {
            buffer.pop_front();
        }
        buffer.push_back(message);
    }

    async fn send<S>(socket: &mut S, message: &Message) -> Result<(), FlowError>
    where
        S: SinkExt<WsMessage> + Unpin,
        S::Error: std::fmt::Display,
    {
        let json = serde_json::to_string(message).map_err(|e| FlowError::Component {
            component: "federation-output".into(),
            reason: e.to_string(),
        })?;
        socket
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|e| FlowError::Component {
                component: "federation-output".into(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Component for FederationOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Output
    }

    async fn start(&mut self, ctx: ComponentContext) -> Result<(), FlowError> {
        let (queue_tx, queue_rx) = mpsc::channel::<Message>(self.config.buffer_capacity.max(1));

        for subject in self.config.subscribe_subjects.clone() {
            let mut subscription = ctx
                .bus
                .subscribe(&subject, DeliveryMode::Core)
                .await
                .map_err(FlowError::Bus)?;
            let filter = self.config.filter.clone();
            let queue_tx = queue_tx.clone();
            self.handles.push(tokio::spawn(async move {
                while let Some(delivery) = subscription.next().await {
                    if filter.matches(&delivery.message)
                        && queue_tx.send(delivery.message).await.is_err()
                    {
                        break;
                    }
                }
            }));
        }

        let config = self.config.clone();
        let connected = Arc::clone(&self.connected);
        self.handles
            .push(tokio::spawn(Self::run_uplink(config, connected, queue_rx)));
        info!(component = self.name, url = self.config.url, "federation output started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), FlowError> {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        Ok(())
    }

    fn health(&self) -> Health {
        if self.connected.load(Ordering::Relaxed) {
            Health::ok()
        } else {
            Health::degraded("federation uplink disconnected, buffering locally")
        }
    }
}
