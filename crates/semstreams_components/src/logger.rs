//! Message logger: structured summaries of bus traffic.
//!
//! Consumes `events.>` (configurable) and never republishes, so it cannot
//! form feedback loops with the rules output.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::info;

use semstreams_bus::DeliveryMode;
use semstreams_flow::{Component, ComponentContext, ComponentKind, FlowError};

/// Logger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Subjects to log.
    pub subscribe_subjects: Vec<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            subscribe_subjects: vec!["events.>".into()],
        }
    }
}

/// The message logger component.
pub struct MessageLogger {
    name: String,
    config: LoggerConfig,
    logged: Arc<AtomicU64>,
    handles: Vec<JoinHandle<()>>,
}

impl MessageLogger {
    /// Build the component.
    #[must_use]
    pub fn new(name: impl Into<String>, config: LoggerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            logged: Arc::new(AtomicU64::new(0)),
            handles: Vec::new(),
        }
    }

    /// Messages logged since startup.
    #[must_use]
    pub fn logged(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Component for MessageLogger {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Output
    }

    async fn start(&mut self, ctx: ComponentContext) -> Result<(), FlowError> {
        for subject in self.config.subscribe_subjects.clone() {
            let mut subscription = ctx
                .bus
                .subscribe(&subject, DeliveryMode::Core)
                .await
                .map_err(FlowError::Bus)?;
            let logged = Arc::clone(&self.logged);
            self.handles.push(tokio::spawn(async move {
                while let Some(delivery) = subscription.next().await {
                    logged.fetch_add(1, Ordering::Relaxed);
                    info!(
                        subject = delivery.subject,
                        id = %delivery.message.id,
                        msg_type = %delivery.message.message_type,
                        source = delivery.message.meta.source,
                        hash = &delivery.message.hash[..12.min(delivery.message.hash.len())],
                        "message"
                    );
                }
            }));
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), FlowError> {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semstreams_bus::{MemoryBus, MessageBus};
    use semstreams_msg::{Message, MessageType};
    use std::time::Duration;

    #[tokio::test]
    async fn test_logger_counts_matching_traffic() {
        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
        let mut logger = MessageLogger::new("logger", LoggerConfig::default());
        logger
            .start(ComponentContext {
                bus: Arc::clone(&bus),
                inputs: vec![],
                outputs: vec![],
            })
            .await
            .unwrap();

        let message = Message::new(
            MessageType::new("events", "test", "v1"),
            serde_json::json!({}),
            "test",
        );
        bus.publish("events.test.v1", &message).await.unwrap();
        bus.publish("other.subject", &message).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(logger.logged(), 1, "only events.> traffic is logged");
    }
}
