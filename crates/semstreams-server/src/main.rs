//! # semstreams-server
//!
//! Loads the flow configuration, connects the bus (NATS or in-process),
//! assembles the component set and runs the flow until interrupted.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use semstreams_bus::nats::NatsBusConfig;
use semstreams_bus::{MemoryBus, MessageBus, NatsBus, buckets};
use semstreams_components::{
    FederationInput, FederationOutput, HttpGateway, MessageLogger, MetricsService, UdpJsonInput,
};
use semstreams_flow::{Component, ComponentFactories, FlowConfig, FlowError, FlowRuntime};
use semstreams_graph::query::QueryConfig;
use semstreams_graph::{GraphConfig, GraphMetrics, GraphProcessor, QueryManager, QueryService};
use semstreams_msg::VocabularyRegistry;
use semstreams_rules::{ActionRegistry, RulesConfig, RulesEngine, RulesMetrics};

#[derive(Parser)]
#[command(name = "semstreams-server", about = "Semantic streaming runtime over NATS")]
struct Args {
    /// Path to the flow configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the NATS URL from config/environment
    #[arg(short, long)]
    nats_url: Option<String>,

    /// Run on the in-process bus instead of NATS (single-binary mode)
    #[arg(long)]
    memory_bus: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    // Config precedence: defaults → file → environment. The KV overlay is
    // applied once the bus is up.
    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "loading flow configuration");
            FlowConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => {
            let mut config = FlowConfig::default();
            config.apply_env(std::env::vars());
            config
        }
    };
    if let Some(url) = args.nats_url {
        config.nats.urls = vec![url];
    }
    if config.components.is_empty() {
        default_components(&mut config);
    }

    // Connect the bus.
    let mut nats_bus = None;
    let bus: Arc<dyn MessageBus> = if args.memory_bus {
        info!("using in-process bus");
        Arc::new(MemoryBus::new())
    } else {
        let nats = NatsBus::connect(NatsBusConfig {
            urls: config.nats.urls.clone(),
            user: config.nats.user.clone(),
            password: config.nats.password.clone(),
            ..NatsBusConfig::default()
        })
        .await
        .context("connecting to NATS")?;
        nats_bus = Some(nats.clone());
        Arc::new(nats)
    };

    // Live overrides from the CONFIG bucket (reset on restart).
    let config_kv = bus.kv(buckets::CONFIG).await?;
    config.apply_kv_overlay(config_kv.as_ref()).await?;

    // Process-wide registries: constructed once, passed in everywhere.
    let metrics_registry = Arc::new(prometheus::Registry::new());
    let vocabulary = Arc::new(VocabularyRegistry::with_defaults());
    let graph_metrics = GraphMetrics::new(&metrics_registry)?;
    let rules_metrics = RulesMetrics::new(&metrics_registry)?;

    // Transport-level gauge: reconnections observed by the NATS client.
    if let Some(nats) = nats_bus.take() {
        let gauge = prometheus::IntGauge::new(
            "bus_reconnections_total",
            "NATS connection events since startup",
        )?;
        metrics_registry.register(Box::new(gauge.clone()))?;
        tokio::spawn(async move {
            loop {
                gauge.set(nats.reconnections() as i64);
                tokio::time::sleep(std::time::Duration::from_secs(15)).await;
            }
        });
    }

    let factories = build_factories(
        &config,
        &bus,
        vocabulary,
        graph_metrics,
        rules_metrics,
        Arc::clone(&metrics_registry),
    )
    .await?;

    let mut runtime = FlowRuntime::build(&config, Arc::clone(&bus), &factories)?;
    info!(components = runtime.len(), "flow assembled");
    runtime.start().await?;
    info!("semstreams running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, draining components");
    runtime.stop().await;
    info!("semstreams stopped");
    Ok(())
}

/// The standard single-binary flow: graph processor, query service, rules
/// engine, logger and metrics endpoint.
fn default_components(config: &mut FlowConfig) {
    let insert = |config: &mut FlowConfig, name: &str, spec: serde_json::Value| {
        if let Ok(spec) = serde_json::from_value(spec) {
            config.components.insert(name.to_string(), spec);
        }
    };
    insert(config, "graph", serde_json::json!({"type": "graph-processor", "config": {}}));
    insert(config, "query", serde_json::json!({"type": "query-service", "config": {}}));
    insert(config, "rules", serde_json::json!({"type": "rules-engine", "config": {}}));
    insert(config, "logger", serde_json::json!({"type": "message-logger", "config": {}}));
    insert(config, "metrics", serde_json::json!({"type": "metrics-service", "config": {}}));
}

/// Pre-builds the stateful graph pipeline (the processor and query service
/// share one data manager) and registers one factory per component type.
async fn build_factories(
    config: &FlowConfig,
    bus: &Arc<dyn MessageBus>,
    vocabulary: Arc<VocabularyRegistry>,
    graph_metrics: GraphMetrics,
    rules_metrics: RulesMetrics,
    metrics_registry: Arc<prometheus::Registry>,
) -> Result<ComponentFactories> {
    let mut factories = ComponentFactories::new();

    // Graph processor + query service are built eagerly so the query path
    // reads through the processor's caches.
    let graph_spec = config
        .components
        .values()
        .find(|spec| spec.component_type == "graph-processor");
    if let Some(spec) = graph_spec {
        let graph_config = GraphConfig::from_value(&spec.config)
            .context("parsing graph-processor config")?;
        let processor = GraphProcessor::new(
            "graph",
            bus.as_ref(),
            graph_config.clone(),
            Arc::clone(&vocabulary),
            graph_metrics.clone(),
        )
        .await
        .context("building graph processor")?;

        let query_manager = Arc::new(
            QueryManager::new(
                bus.as_ref(),
                processor.data_manager(),
                &graph_config,
                QueryConfig::default(),
                graph_metrics.clone(),
            )
            .await
            .context("building query manager")?,
        );

        let processor_slot = Mutex::new(Some(processor));
        factories.register("graph-processor", move |name, _spec| {
            let mut slot = processor_slot.lock().map_err(|_| FlowError::Component {
                component: name.to_string(),
                reason: "graph processor slot poisoned".into(),
            })?;
            slot.take()
                .map(|processor| Box::new(processor) as Box<dyn Component>)
                .ok_or_else(|| FlowError::Component {
                    component: name.to_string(),
                    reason: "only one graph-processor per flow".into(),
                })
        });

        factories.register("query-service", move |name, _spec| {
            Ok(Box::new(QueryService::new(name, Arc::clone(&query_manager))) as Box<dyn Component>)
        });
    }

    factories.register("rules-engine", move |name, spec| {
        let rules_config =
            RulesConfig::from_value(&spec.config).map_err(|e| FlowError::Component {
                component: name.to_string(),
                reason: e.to_string(),
            })?;
        let engine = RulesEngine::new(
            name,
            rules_config,
            ActionRegistry::with_defaults(),
            rules_metrics.clone(),
        )
        .map_err(|e| FlowError::Component {
            component: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(engine) as Box<dyn Component>)
    });

    factories.register("udp-input", |name, spec| {
        let config = serde_json::from_value(spec.config.clone()).unwrap_or_default();
        Ok(Box::new(UdpJsonInput::new(name, config)) as Box<dyn Component>)
    });
    factories.register("websocket-input", |name, spec| {
        let config = serde_json::from_value(spec.config.clone()).unwrap_or_default();
        Ok(Box::new(FederationInput::new(name, config)) as Box<dyn Component>)
    });
    factories.register("federation-output", |name, spec| {
        let config = serde_json::from_value(spec.config.clone()).unwrap_or_default();
        Ok(Box::new(FederationOutput::new(name, config)) as Box<dyn Component>)
    });
    factories.register("http-gateway", |name, spec| {
        let config = serde_json::from_value(spec.config.clone()).unwrap_or_default();
        Ok(Box::new(HttpGateway::new(name, config)) as Box<dyn Component>)
    });
    factories.register("message-logger", |name, spec| {
        let config = serde_json::from_value(spec.config.clone()).unwrap_or_default();
        Ok(Box::new(MessageLogger::new(name, config)) as Box<dyn Component>)
    });
    factories.register("metrics-service", move |name, spec| {
        let config = serde_json::from_value(spec.config.clone()).unwrap_or_default();
        Ok(Box::new(MetricsService::new(
            name,
            config,
            Arc::clone(&metrics_registry),
        )) as Box<dyn Component>)
    });

    Ok(factories)
}
