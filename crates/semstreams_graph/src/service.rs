//! Bus request/reply front-end for the query manager.
//!
//! Serves `graph.query.{entity|alias|predicate|incoming|traverse|nearby|
//! temporal|semantic}`. The HTTP gateway maps its paths 1:1 onto these
//! subjects, so both surfaces share one contract.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use semstreams_bus::{Delivery, DeliveryMode, MessageBus};
use semstreams_flow::{Component, ComponentContext, ComponentKind, FlowError};
use semstreams_msg::{EntityId, Message, MessageType};

use crate::error::GraphError;
use crate::query::{
    NearbyRequest, Page, QueryManager, SemanticRequest, TemporalRequest,
};
use crate::traverse::TraverseRequest;

/// Subject prefix for query request/reply.
pub const QUERY_PREFIX: &str = "graph.query";

/// Wire envelope for query responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryReply {
    /// Whether the query succeeded.
    pub ok: bool,
    /// Result document on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error detail on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryReplyError>,
}

/// Error detail carried in a [`QueryReply`].
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryReplyError {
    /// Human-readable message.
    pub message: String,
    /// Whether the caller may retry (maps to 429/503 at the gateway).
    pub retryable: bool,
}

impl QueryReply {
    fn success(result: serde_json::Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(error: &GraphError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(QueryReplyError {
                message: error.to_string(),
                retryable: error.is_retryable(),
            }),
        }
    }
}

/// The query service component.
pub struct QueryService {
    name: String,
    manager: Arc<QueryManager>,
    handle: Option<JoinHandle<()>>,
}

impl QueryService {
    /// Wrap a query manager.
    #[must_use]
    pub fn new(name: impl Into<String>, manager: Arc<QueryManager>) -> Self {
        Self {
            name: name.into(),
            manager,
            handle: None,
        }
    }

    async fn dispatch(manager: &QueryManager, op: &str, payload: &serde_json::Value)
    -> Result<serde_json::Value, GraphError> {
        match op {
            "entity" => {
                let id: String = required_field(payload, "id")?;
                let id = EntityId::parse(id)?;
                Ok(serde_json::to_value(manager.get_entity(&id).await?)?)
            }
            "alias" => {
                let alias: String = required_field(payload, "alias")?;
                Ok(serde_json::to_value(manager.resolve_alias(&alias).await?)?)
            }
            "predicate" => {
                let predicate: String = required_field(payload, "predicate")?;
                let page: Page = optional_page(payload);
                Ok(serde_json::to_value(
                    manager.by_predicate(&predicate, page).await?,
                )?)
            }
            "incoming" => {
                let target: String = required_field(payload, "target")?;
                let target = EntityId::parse(target)?;
                let page: Page = optional_page(payload);
                Ok(serde_json::to_value(manager.incoming(&target, page).await?)?)
            }
            "traverse" => {
                let request: TraverseRequest = serde_json::from_value(payload.clone())?;
                Ok(serde_json::to_value(manager.traverse(&request).await?)?)
            }
            "nearby" => {
                let request: NearbyRequest = serde_json::from_value(payload.clone())?;
                Ok(serde_json::to_value(manager.nearby(&request).await?)?)
            }
            "temporal" => {
                let request: TemporalRequest = serde_json::from_value(payload.clone())?;
                Ok(serde_json::to_value(manager.active_in(&request).await?)?)
            }
            "semantic" => {
                let request: SemanticRequest = serde_json::from_value(payload.clone())?;
                Ok(serde_json::to_value(manager.semantic(&request).await?)?)
            }
            other => Err(GraphError::InvalidQuery(format!("unknown op {other:?}"))),
        }
    }

    async fn serve(
        manager: Arc<QueryManager>,
        bus: Arc<dyn MessageBus>,
        delivery: Delivery,
    ) {
        let Some(reply) = delivery.reply else {
            return;
        };
        let op = delivery
            .subject
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_string();

        let response = match Self::dispatch(&manager, &op, &delivery.message.payload).await {
            Ok(result) => QueryReply::success(result),
            Err(error) => {
                warn!(op, %error, "query failed");
                QueryReply::failure(&error)
            }
        };

        let payload = match serde_json::to_value(&response) {
            Ok(value) => value,
            Err(_) => serde_json::json!({"ok": false}),
        };
        let message = Message::new(
            MessageType::new("graph", "query_response", "v1"),
            payload,
            "query-service",
        );
        if let Err(error) = bus.publish(&reply, &message).await {
            warn!(%error, "failed to publish query reply");
        }
    }
}

fn required_field<T: serde::de::DeserializeOwned>(
    payload: &serde_json::Value,
    field: &str,
) -> Result<T, GraphError> {
    let value = payload
        .get(field)
        .cloned()
        .ok_or_else(|| GraphError::InvalidQuery(format!("missing field {field:?}")))?;
    Ok(serde_json::from_value(value)?)
}

fn optional_page(payload: &serde_json::Value) -> Page {
    payload
        .get("page")
        .and_then(|p| serde_json::from_value(p.clone()).ok())
        .unwrap_or_default()
}

#[async_trait]
impl Component for QueryService {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Processor
    }

    async fn start(&mut self, ctx: ComponentContext) -> Result<(), FlowError> {
        let pattern = format!("{QUERY_PREFIX}.*");
        let mut subscription = ctx
            .bus
            .subscribe(&pattern, DeliveryMode::Core)
            .await
            .map_err(FlowError::Bus)?;
        info!(component = self.name, pattern, "query service listening");

        let manager = Arc::clone(&self.manager);
        let bus = Arc::clone(&ctx.bus);
        self.handle = Some(tokio::spawn(async move {
            while let Some(delivery) = subscription.next().await {
                // Each request runs on its own task so a slow traversal
                // cannot head-of-line block cheap gets.
                let manager = Arc::clone(&manager);
                let bus = Arc::clone(&bus);
                tokio::spawn(Self::serve(manager, bus, delivery));
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
