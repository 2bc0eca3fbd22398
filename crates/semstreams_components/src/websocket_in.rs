//! Federation input: accepts remote WebSocket peers and republishes their
//! messages on the local bus.

use std::net::SocketAddr;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use semstreams_bus::MessageBus;
use semstreams_flow::{Component, ComponentContext, ComponentKind, FlowError};
use semstreams_msg::Message;

/// Federation input settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationInputConfig {
    /// Listen address.
    pub listen_addr: String,
    /// Override the publish subject; defaults to each message's own
    /// `domain.category.version`.
    pub publish_subject: Option<String>,
}

impl Default for FederationInputConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8443".into(),
            publish_subject: None,
        }
    }
}

/// The federation WebSocket input component.
pub struct FederationInput {
    name: String,
    config: FederationInputConfig,
    handle: Option<JoinHandle<()>>,
}

impl FederationInput {
    /// Build the component.
    #[must_use]
    pub fn new(name: impl Into<String>, config: FederationInputConfig) -> Self {
        Self {
            name: name.into(),
            config,
            handle: None,
        }
    }

    async fn serve_peer(
        bus: std::sync::Arc<dyn MessageBus>,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        publish_subject: Option<String>,
    ) {
        let mut socket = match accept_async(stream).await {
            Ok(socket) => socket,
            Err(error) => {
                debug!(%peer, %error, "websocket handshake failed");
                return;
            }
        };
        info!(%peer, "federation peer connected");

        while let Some(next) = socket.next().await {
            let frame = match next {
                Ok(frame) => frame,
                Err(error) => {
                    debug!(%peer, %error, "peer connection closed");
                    break;
                }
            };
            let WsMessage::Text(text) = frame else {
                continue;
            };
            match serde_json::from_str::<Message>(&text) {
                Ok(message) => {
                    let subject = publish_subject
                        .clone()
                        .unwrap_or_else(|| message.subject());
                    if let Err(error) = bus.publish(&subject, &message).await {
                        warn!(%peer, %error, "failed to republish federated message");
                    }
                }
                Err(error) => {
                    debug!(%peer, %error, "undecodable federated frame dropped");
                }
            }
        }
    }
}

#[async_trait]
impl Component for FederationInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Input
    }

    async fn start(&mut self, ctx: ComponentContext) -> Result<(), FlowError> {
        // Bind failure on an input is fatal for the whole flow.
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        info!(
            component = self.name,
            addr = self.config.listen_addr,
            "federation input listening"
        );

        let bus = ctx.bus;
        let publish_subject = self.config.publish_subject.clone();
        self.handle = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tokio::spawn(Self::serve_peer(
                            std::sync::Arc::clone(&bus),
                            stream,
                            peer,
                            publish_subject.clone(),
                        ));
                    }
                    Err(error) => {
                        warn!(%error, "accept failed");
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), FlowError> {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        Ok(())
    }
}
