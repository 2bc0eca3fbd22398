//! Embedder fallback scenario: the configured HTTP provider is unreachable,
//! ingest falls back to the built-in lexical embedder, nothing is lost, and
//! semantic search still ranks the entity first.

use std::sync::Arc;
use std::time::Duration;

use semstreams_bus::{KvStore, MemoryBus, MessageBus, buckets};
use semstreams_flow::{Component, ComponentContext};
use semstreams_graph::query::{QueryConfig, SemanticRequest};
use semstreams_graph::{EmbeddingConfig, GraphConfig, GraphMetrics, GraphProcessor, QueryManager};
use semstreams_msg::{
    EntityId, GraphPayload, Message, MessageType, Payload, Triple, TripleObject,
    VocabularyRegistry,
};

fn embedding_config() -> GraphConfig {
    GraphConfig {
        coalesce_window_ms: 1,
        embedding: EmbeddingConfig {
            enabled: true,
            provider: "http".into(),
            // Nothing listens here; every request fails fast and falls back.
            endpoint: Some("http://127.0.0.1:9/v1/embeddings".into()),
            timeout_ms: 200,
            dimension: 128,
            ..EmbeddingConfig::default()
        },
        ..GraphConfig::default()
    }
}

fn entity(n: u32) -> EntityId {
    EntityId::parse(format!("acme.plat1.ops.hq.report.{n:03}")).unwrap()
}

fn titled(id: EntityId, title: &str) -> GraphPayload {
    GraphPayload::new(
        id.clone(),
        vec![Triple::new(
            id,
            "title",
            TripleObject::Text(title.into()),
            "ingest",
        )],
    )
}

async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_provider_down_falls_back_and_ranks() {
    let config = embedding_config();
    let bus = Arc::new(MemoryBus::new());
    let mut processor = GraphProcessor::new(
        "graph",
        bus.as_ref(),
        config.clone(),
        Arc::new(VocabularyRegistry::with_defaults()),
        GraphMetrics::unregistered(),
    )
    .await
    .unwrap();
    processor
        .start(ComponentContext {
            bus: bus.clone(),
            inputs: vec![],
            outputs: vec![],
        })
        .await
        .unwrap();

    let queries = QueryManager::new(
        bus.as_ref(),
        processor.data_manager(),
        &config,
        QueryConfig::default(),
        GraphMetrics::unregistered(),
    )
    .await
    .unwrap();

    let titles = [
        (1, "coastal rescue drone sweep"),
        (2, "harbour maintenance schedule"),
        (3, "fleet fuel consumption report"),
    ];
    for (n, title) in titles {
        let message = Message::new(
            MessageType::new("events", "graph", "v1"),
            titled(entity(n), title).to_json(),
            "test-input",
        );
        bus.publish("events.graph.entity.report", &message)
            .await
            .unwrap();
    }

    // No message is lost: every entity gets a vector via the fallback.
    let embedding_kv = bus.kv(buckets::EMBEDDING_INDEX).await.unwrap();
    assert!(
        eventually(|| async { embedding_kv.keys().await.is_ok_and(|k| k.len() == 3) }).await,
        "all three entities embedded despite the dead provider"
    );

    let response = queries
        .semantic(&SemanticRequest {
            text: "coastal rescue drone sweep".into(),
            k: 3,
            threshold: 0.0,
        })
        .await
        .unwrap();

    assert!(!response.hits.is_empty());
    assert_eq!(
        response.hits[0].entity,
        entity(1).as_str(),
        "querying with the exact title ranks its entity first"
    );
    if response.hits.len() > 1 {
        assert!(response.hits[0].score > response.hits[1].score);
    }
    drop(processor);
}

#[tokio::test]
async fn test_semantic_disabled_is_invalid_query() {
    let config = GraphConfig {
        coalesce_window_ms: 1,
        ..GraphConfig::default()
    };
    let bus = Arc::new(MemoryBus::new());
    let processor = GraphProcessor::new(
        "graph",
        bus.as_ref(),
        config.clone(),
        Arc::new(VocabularyRegistry::with_defaults()),
        GraphMetrics::unregistered(),
    )
    .await
    .unwrap();

    let queries = QueryManager::new(
        bus.as_ref(),
        processor.data_manager(),
        &config,
        QueryConfig::default(),
        GraphMetrics::unregistered(),
    )
    .await
    .unwrap();

    let err = queries
        .semantic(&SemanticRequest {
            text: "anything".into(),
            k: 5,
            threshold: 0.0,
        })
        .await
        .unwrap_err();
    assert!(!err.is_retryable(), "disabled index is a validation error");
}
