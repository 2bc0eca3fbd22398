//! End-to-end ingest scenarios over the in-process bus: publish graphable
//! payloads on the ingress subject, then observe entity state and every
//! secondary index through the query manager.

use std::sync::Arc;
use std::time::Duration;

use semstreams_bus::{KvStore, MemoryBus, MessageBus};
use semstreams_flow::{Component, ComponentContext};
use semstreams_graph::query::{NearbyRequest, Page, QueryConfig};
use semstreams_graph::traverse::TraverseRequest;
use semstreams_graph::{GraphConfig, GraphMetrics, GraphProcessor, QueryManager};
use semstreams_msg::{
    EntityId, GraphPayload, Message, MessageType, Payload, Position, Triple, TripleObject,
    VocabularyRegistry,
};

struct Harness {
    bus: Arc<MemoryBus>,
    processor: GraphProcessor,
    queries: QueryManager,
}

async fn harness(config: GraphConfig) -> Harness {
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

    let ctx = ComponentContext {
        bus: bus.clone(),
        inputs: vec![],
        outputs: vec![],
    };
    processor.start(ctx).await.unwrap();

    let queries = QueryManager::new(
        bus.as_ref(),
        processor.data_manager(),
        &config,
        QueryConfig::default(),
        GraphMetrics::unregistered(),
    )
    .await
    .unwrap();

    Harness {
        bus,
        processor,
        queries,
    }
}

fn fast_config() -> GraphConfig {
    GraphConfig {
        coalesce_window_ms: 1,
        ..GraphConfig::default()
    }
}

fn drone() -> EntityId {
    EntityId::parse("acme.plat1.robotics.gcs1.drone.001").unwrap()
}

fn fleet() -> EntityId {
    EntityId::parse("acme.plat1.ops.hq.fleet.rescue").unwrap()
}

fn graph_message(payload: &GraphPayload) -> Message {
    Message::new(
        MessageType::new("events", "graph", "v1"),
        payload.to_json(),
        "test-input",
    )
}

async fn publish(bus: &MemoryBus, payload: &GraphPayload) {
    bus.publish("events.graph.entity.drone", &graph_message(payload))
        .await
        .unwrap();
}

/// Poll until the condition holds or a 2 s deadline passes.
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
async fn test_basic_ingest_and_reverse_lookup() {
    let h = harness(fast_config()).await;

    let payload = GraphPayload::new(
        drone(),
        vec![Triple::new(
            drone(),
            "graph.rel.belongs_to",
            TripleObject::Entity(fleet()),
            "ingest",
        )],
    );
    publish(&h.bus, &payload).await;

    assert!(
        eventually(|| async {
            h.queries
                .get_entity(&drone())
                .await
                .is_ok_and(|r| r.entity.is_some())
        })
        .await,
        "entity state appears"
    );

    let response = h.queries.get_entity(&drone()).await.unwrap();
    let state = response.entity.unwrap();
    assert_eq!(state.node.id, drone());
    assert_eq!(state.edges.len(), 1);
    assert_eq!(state.edges[0].target, fleet());

    // Reverse edge converges into INCOMING_INDEX within the window.
    assert!(
        eventually(|| async {
            h.queries
                .incoming(&fleet(), Page::default())
                .await
                .is_ok_and(|r| r.entities.iter().any(|e| e.node.id == drone()))
        })
        .await,
        "incoming index lists the drone"
    );

    assert!(
        eventually(|| async {
            h.queries
                .by_predicate("graph.rel.belongs_to", Page::default())
                .await
                .is_ok_and(|r| r.entities.iter().any(|e| e.node.id == drone()))
        })
        .await,
        "predicate index lists the drone"
    );

    // Every key in the entity bucket is a valid six-segment federated ID.
    let keys = h
        .bus
        .kv(semstreams_bus::buckets::ENTITY_STATES)
        .await
        .unwrap()
        .keys()
        .await
        .unwrap();
    assert!(!keys.is_empty());
    for key in keys {
        assert!(EntityId::parse(key.clone()).is_ok(), "bad entity key {key}");
    }
}

#[tokio::test]
async fn test_alias_resolution_with_sanitisation() {
    let h = harness(fast_config()).await;

    let payload = GraphPayload::new(
        drone(),
        vec![Triple::new(
            drone(),
            "identifier.callsign",
            TripleObject::Text("ALPHA-1".into()),
            "ingest",
        )],
    );
    publish(&h.bus, &payload).await;

    assert!(
        eventually(|| async {
            h.queries
                .resolve_alias("ALPHA-1")
                .await
                .is_ok_and(|r| r.resolved.as_ref() == Some(&drone()))
        })
        .await,
        "alias resolves"
    );

    // Sanitisation lowercases and maps separators to `_`, so the spaced
    // form resolves to the same entity.
    let spaced = h.queries.resolve_alias("alpha 1").await.unwrap();
    assert_eq!(spaced.resolved, Some(drone()));
    assert!(spaced.entity.is_some());
}

#[tokio::test]
async fn test_idempotent_redelivery_single_state_change() {
    let h = harness(fast_config()).await;

    let payload = GraphPayload::new(
        drone(),
        vec![Triple::new(
            drone(),
            "robotics.battery.level",
            TripleObject::Number(55.0),
            "ingest",
        )],
    );
    let message = graph_message(&payload);
    for _ in 0..5 {
        h.bus
            .publish("events.graph.entity.drone", &message)
            .await
            .unwrap();
    }

    assert!(
        eventually(|| async {
            h.queries
                .get_entity(&drone())
                .await
                .is_ok_and(|r| r.entity.is_some())
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = h.queries.get_entity(&drone()).await.unwrap().entity.unwrap();
    assert_eq!(state.version, 1, "five redeliveries, one logical change");
}

#[tokio::test]
async fn test_version_monotonic_across_updates() {
    let h = harness(fast_config()).await;

    let mut last_version = 0;
    for (i, level) in [90.0, 60.0, 30.0].into_iter().enumerate() {
        let ts = chrono::Utc::now() + chrono::Duration::seconds(i as i64);
        let payload = GraphPayload::new(
            drone(),
            vec![
                Triple::new(
                    drone(),
                    "robotics.battery.level",
                    TripleObject::Number(level),
                    "ingest",
                )
                .with_timestamp(ts),
            ],
        );
        publish(&h.bus, &payload).await;

        let expected = (i + 1) as u64;
        assert!(
            eventually(|| async {
                h.queries
                    .get_entity(&drone())
                    .await
                    .is_ok_and(|r| r.entity.as_ref().is_some_and(|e| e.version == expected))
            })
            .await,
            "version reached {expected}"
        );
        let state = h.queries.get_entity(&drone()).await.unwrap().entity.unwrap();
        assert!(state.version > last_version);
        last_version = state.version;
    }
}

#[tokio::test]
async fn test_spatial_proximity() {
    let h = harness(fast_config()).await;

    let positions = [
        (1, 37.7749, -122.4194),
        (2, 37.7750, -122.4195),
        (3, 37.8000, -122.5000),
    ];
    for (n, lat, lon) in positions {
        let id = EntityId::parse(format!("acme.plat1.robotics.gcs1.drone.{n:03}")).unwrap();
        let payload = GraphPayload::new(id, vec![]).with_position(Position {
            lat,
            lon,
            alt: None,
        });
        publish(&h.bus, &payload).await;
    }

    let request = NearbyRequest {
        lat: 37.7749,
        lon: -122.4194,
        precision: Some(7),
        radius_bins: 1,
    };
    assert!(
        eventually(|| async {
            h.queries
                .nearby(&request)
                .await
                .is_ok_and(|r| r.entities.len() == 2)
        })
        .await,
        "the two close drones are in adjacent bins"
    );

    let response = h.queries.nearby(&request).await.unwrap();
    assert!(response.entities.contains_key("acme.plat1.robotics.gcs1.drone.001"));
    assert!(response.entities.contains_key("acme.plat1.robotics.gcs1.drone.002"));
    assert!(!response.entities.contains_key("acme.plat1.robotics.gcs1.drone.003"));
}

#[tokio::test]
async fn test_traversal_bounds() {
    let h = harness(fast_config()).await;

    // Chain n0 → n1 → n2 → n3 → n4.
    let node = |n: u32| EntityId::parse(format!("acme.plat1.ops.hq.node.{n:03}")).unwrap();
    for i in 0..5u32 {
        let mut triples = Vec::new();
        if i + 1 < 5 {
            triples.push(Triple::new(
                node(i),
                "graph.rel.linked_to",
                TripleObject::Entity(node(i + 1)),
                "ingest",
            ));
        } else {
            triples.push(Triple::new(
                node(i),
                "identifier.name",
                TripleObject::Text(format!("node {i}")),
                "ingest",
            ));
        }
        publish(&h.bus, &GraphPayload::new(node(i), triples)).await;
    }

    assert!(
        eventually(|| async {
            h.queries
                .incoming(&node(4), Page::default())
                .await
                .is_ok_and(|r| !r.entities.is_empty())
        })
        .await,
        "chain fully indexed"
    );

    let bounded = TraverseRequest {
        max_depth: 2,
        ..TraverseRequest::from_start(node(0))
    };
    let result = h.queries.traverse(&bounded).await.unwrap();
    assert!(!result.truncated, "depth exhaustion is natural termination");
    assert_eq!(result.nodes.len(), 3);
    assert_eq!(result.nodes[0].score, 1.0);
    assert!((result.nodes[1].score - 0.85).abs() < 1e-9);
    assert!((result.nodes[2].score - 0.7225).abs() < 1e-9);

    let clipped = TraverseRequest {
        max_depth: 10,
        max_nodes: 2,
        ..TraverseRequest::from_start(node(0))
    };
    let result = h.queries.traverse(&clipped).await.unwrap();
    assert!(result.truncated, "node budget exhaustion is contractual");
    let ids: Vec<&EntityId> = result.nodes.iter().map(|n| &n.id).collect();
    assert_eq!(ids, vec![&node(0), &node(1)]);
}

#[tokio::test]
async fn test_validation_failure_surfaces_on_errors_subject() {
    let h = harness(fast_config()).await;
    let mut errors = h
        .bus
        .subscribe(semstreams_bus::subject::ERRORS, semstreams_bus::DeliveryMode::Core)
        .await
        .unwrap();

    // A graph-shaped payload whose triple subject does not match the
    // payload entity fails validation and is dropped, not retried.
    let bad = serde_json::json!({
        "entity_id": drone().as_str(),
        "entity_type": "drone",
        "triples": [{
            "subject": fleet().as_str(),
            "predicate": "robotics.battery.level",
            "object": 50.0,
            "source": "ingest",
            "timestamp": chrono::Utc::now(),
            "confidence": 1.0
        }]
    });
    let message = Message::new(MessageType::new("events", "graph", "v1"), bad, "test-input");
    h.bus
        .publish("events.graph.entity.drone", &message)
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), errors.next())
        .await
        .expect("error event within 1s")
        .unwrap();
    assert_eq!(event.subject, "events.errors");
    assert_eq!(event.message.payload["kind"], "graph.ingest");
    assert_eq!(
        event.message.payload["body"]["message_id"],
        serde_json::json!(message.id)
    );

    // The bad message produced no entity state.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.queries.get_entity(&drone()).await.unwrap().entity.is_none());
}

#[tokio::test]
async fn test_non_graphable_payload_skipped() {
    let h = harness(fast_config()).await;

    let message = Message::new(
        MessageType::new("events", "graph", "v1"),
        serde_json::json!({"kind": "heartbeat", "body": {}}),
        "test-input",
    );
    h.bus
        .publish("events.graph.entity.misc", &message)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Nothing was written; the skip is silent, not an error.
    let keys = h
        .bus
        .kv(semstreams_bus::buckets::ENTITY_STATES)
        .await
        .unwrap()
        .keys()
        .await
        .unwrap();
    assert!(keys.is_empty());
    drop(h.processor);
}
