//! Prometheus metrics endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use semstreams_flow::{Component, ComponentContext, ComponentKind, FlowError};

/// Metrics service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Listen address.
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9090".into(),
        }
    }
}

/// Serves the process metrics registry on `/metrics`.
pub struct MetricsService {
    name: String,
    config: MetricsConfig,
    registry: Arc<Registry>,
    handle: Option<JoinHandle<()>>,
}

impl MetricsService {
    /// Build the component around the shared registry.
    #[must_use]
    pub fn new(name: impl Into<String>, config: MetricsConfig, registry: Arc<Registry>) -> Self {
        Self {
            name: name.into(),
            config,
            registry,
            handle: None,
        }
    }

    async fn scrape(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
        let encoder = TextEncoder::new();
        let mut out = Vec::new();
        match encoder.encode(&registry.gather(), &mut out) {
            Ok(()) => (StatusCode::OK, out).into_response(),
            Err(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error.to_string(),
            )
                .into_response(),
        }
    }
}

#[async_trait]
impl Component for MetricsService {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Output
    }

    async fn start(&mut self, _ctx: ComponentContext) -> Result<(), FlowError> {
        let app = Router::new()
            .route("/metrics", get(Self::scrape))
            .with_state(Arc::clone(&self.registry));
        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr).await?;
        info!(
            component = self.name,
            addr = self.config.listen_addr,
            "metrics endpoint listening"
        );
        self.handle = Some(tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, app).await {
                warn!(%error, "metrics server exited");
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
