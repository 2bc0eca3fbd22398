//! HTTP gateway: paths mapped 1:1 onto the `graph.query.*` subjects.
//!
//! Response contract: `200` with the result (which may carry
//! `truncated=true`), `400` for validation failures, `404` for unknown
//! operations, `429` when rate limited, `503` with `retry_after` when a
//! downstream dependency is failing, `500` only for broken invariants.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use semstreams_bus::MessageBus;
use semstreams_flow::{Component, ComponentContext, ComponentKind, FlowError};
use semstreams_graph::service::{QUERY_PREFIX, QueryReply};
use semstreams_msg::{Message, MessageType};

const KNOWN_OPS: [&str; 8] = [
    "entity",
    "alias",
    "predicate",
    "incoming",
    "traverse",
    "nearby",
    "temporal",
    "semantic",
];

/// Gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen address.
    pub listen_addr: String,
    /// Per-request bus deadline in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            request_timeout_ms: 5_000,
        }
    }
}

struct GatewayState {
    bus: Arc<dyn MessageBus>,
    timeout: Duration,
}

/// The HTTP query gateway component.
pub struct HttpGateway {
    name: String,
    config: GatewayConfig,
    handle: Option<JoinHandle<()>>,
}

impl HttpGateway {
    /// Build the component.
    #[must_use]
    pub fn new(name: impl Into<String>, config: GatewayConfig) -> Self {
        Self {
            name: name.into(),
            config,
            handle: None,
        }
    }

    async fn query(
        State(state): State<Arc<GatewayState>>,
        Path(op): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> Response {
        if !KNOWN_OPS.contains(&op.as_str()) {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": format!("unknown query op {op:?}")})),
            )
                .into_response();
        }

        let subject = format!("{QUERY_PREFIX}.{op}");
        let request = Message::new(
            MessageType::new("graph", "query", "v1"),
            body,
            "http-gateway",
        );

        let reply = match state.bus.request(&subject, &request, state.timeout).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(op, %error, "query transport failed");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({"error": error.to_string(), "retry_after": 1})),
                )
                    .into_response();
            }
        };

        let Ok(reply) = serde_json::from_value::<QueryReply>(reply.payload) else {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "malformed query reply"})),
            )
                .into_response();
        };

        match (reply.ok, reply.result, reply.error) {
            (true, Some(result), _) => (StatusCode::OK, Json(result)).into_response(),
            (_, _, Some(error)) if error.retryable => {
                let status = if error.message.contains("rate limit") {
                    StatusCode::TOO_MANY_REQUESTS
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                (
                    status,
                    Json(serde_json::json!({"error": error.message, "retry_after": 1})),
                )
                    .into_response()
            }
            (_, _, Some(error)) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": error.message})),
            )
                .into_response(),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "empty query reply"})),
            )
                .into_response(),
        }
    }
}

#[async_trait]
impl Component for HttpGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Output
    }

    async fn start(&mut self, ctx: ComponentContext) -> Result<(), FlowError> {
        let state = Arc::new(GatewayState {
            bus: ctx.bus,
            timeout: Duration::from_millis(self.config.request_timeout_ms),
        });
        let app = Router::new()
            .route("/query/{op}", post(Self::query))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr).await?;
        info!(
            component = self.name,
            addr = self.config.listen_addr,
            "http gateway listening"
        );
        self.handle = Some(tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, app).await {
                warn!(%error, "gateway server exited");
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
