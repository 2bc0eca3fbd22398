//! UDP input: JSON message envelopes as datagrams.
//!
//! Each datagram carries one message envelope. The publish subject comes
//! from the component's output port — which may carry `{field}` placeholders
//! resolved against the payload — falling back to the message's own type
//! subject. A datagram whose placeholder cannot be resolved is dropped with
//! a recorded error, per the port templating contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use semstreams_flow::{Component, ComponentContext, ComponentKind, FlowError, resolve_subject};
use semstreams_msg::Message;

/// Largest accepted datagram.
const MAX_DATAGRAM: usize = 65_536;

/// UDP input settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpInputConfig {
    /// Bind address.
    pub listen_addr: String,
}

impl Default for UdpInputConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5005".into(),
        }
    }
}

/// The UDP JSON input component.
pub struct UdpJsonInput {
    name: String,
    config: UdpInputConfig,
    handle: Option<JoinHandle<()>>,
}

impl UdpJsonInput {
    /// Build the component.
    #[must_use]
    pub fn new(name: impl Into<String>, config: UdpInputConfig) -> Self {
        Self {
            name: name.into(),
            config,
            handle: None,
        }
    }
}

#[async_trait]
impl Component for UdpJsonInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Input
    }

    async fn start(&mut self, ctx: ComponentContext) -> Result<(), FlowError> {
        // Bind failure on an input is fatal for the whole flow.
        let socket = UdpSocket::bind(&self.config.listen_addr).await?;
        info!(
            component = self.name,
            addr = self.config.listen_addr,
            "udp input listening"
        );

        let bus = ctx.bus.clone();
        let output_template = ctx.output("out").map(|p| p.subject.clone());
        let component = self.name.clone();
        self.handle = Some(tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, peer) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(error) => {
                        warn!(%error, "udp receive failed");
                        continue;
                    }
                };
                let message: Message = match serde_json::from_slice(&buf[..len]) {
                    Ok(message) => message,
                    Err(error) => {
                        debug!(%peer, %error, "undecodable datagram dropped");
                        continue;
                    }
                };

                let subject = match &output_template {
                    Some(template) => match resolve_subject(template, &message.payload) {
                        Ok(subject) => subject,
                        Err(error) => {
                            warn!(component, %error, "unresolvable output template, dropping");
                            continue;
                        }
                    },
                    None => message.subject(),
                };
                if let Err(error) = bus.publish(&subject, &message).await {
                    warn!(component, %error, "publish failed");
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
