//! Battery alert scenario: a low-battery rule fires once per cooldown per
//! entity, and derived alerts are ordinary graph events on the rules output
//! subject.

use std::sync::Arc;
use std::time::Duration;

use semstreams_bus::{DeliveryMode, KvStore, MemoryBus, MessageBus, buckets};
use semstreams_flow::{Component, ComponentContext};
use semstreams_rules::{ActionRegistry, RulesConfig, RulesEngine, RulesMetrics};
use semstreams_msg::{EntityId, EntityState, Triple, TripleObject, VocabularyRegistry};

fn drone() -> EntityId {
    EntityId::parse("acme.plat1.robotics.gcs1.drone.001").unwrap()
}

fn battery_rule(cooldown: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "battery-low",
        "type": "alert",
        "entity": {"pattern": "*.*.robotics.*.drone.*"},
        "conditions": [
            {"field": "robotics.battery.level", "operator": "lte", "value": 20}
        ],
        "cooldown": cooldown,
        "metadata": {"severity": "critical"}
    })
}

async fn write_battery(bus: &MemoryBus, state: &mut EntityState, level: f64) {
    let registry = VocabularyRegistry::with_defaults();
    let ts = chrono::Utc::now();
    state.merge(
        vec![
            Triple::new(
                drone(),
                "robotics.battery.level",
                TripleObject::Number(level),
                "telemetry",
            )
            .with_timestamp(ts),
        ],
        &registry.snapshot(),
    );
    let kv = bus.kv(buckets::ENTITY_STATES).await.unwrap();
    kv.put(drone().as_str(), serde_json::to_vec(state).unwrap())
        .await
        .unwrap();
}

async fn engine_on(bus: &Arc<MemoryBus>, cooldown: &str) -> RulesEngine {
    let config: RulesConfig = serde_json::from_value(serde_json::json!({
        "rules": [battery_rule(cooldown)]
    }))
    .unwrap();
    let mut engine = RulesEngine::new(
        "rules",
        config,
        ActionRegistry::with_defaults(),
        RulesMetrics::unregistered(),
    )
    .unwrap();
    engine
        .start(ComponentContext {
            bus: bus.clone(),
            inputs: vec![],
            outputs: vec![],
        })
        .await
        .unwrap();
    engine
}

#[tokio::test]
async fn test_alert_fires_once_per_cooldown() {
    let bus = Arc::new(MemoryBus::new());
    let _engine = engine_on(&bus, "400ms").await;
    let mut alerts = bus
        .subscribe("events.rules.>", DeliveryMode::Core)
        .await
        .unwrap();

    let mut state = EntityState::new(drone(), "drone");

    // Low reading: exactly one alert, promptly.
    write_battery(&bus, &mut state, 15.4).await;
    let first = tokio::time::timeout(Duration::from_millis(100), alerts.next())
        .await
        .expect("alert within 100ms")
        .unwrap();
    assert_eq!(first.subject, "events.rules.battery_low");
    let alert_entity = first.message.payload["entity_id"].as_str().unwrap();
    assert!(alert_entity.contains("alert"));
    assert!(
        first.message.payload["triples"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t["predicate"] == "graph.rel.alert_for"),
        "alert links back to the drone"
    );

    // Second low reading inside the cooldown: silence.
    write_battery(&bus, &mut state, 12.0).await;
    assert!(
        tokio::time::timeout(Duration::from_millis(150), alerts.next())
            .await
            .is_err(),
        "no second alert within the cooldown"
    );

    // After the cooldown, the next low reading fires again.
    tokio::time::sleep(Duration::from_millis(400)).await;
    write_battery(&bus, &mut state, 9.0).await;
    assert!(
        tokio::time::timeout(Duration::from_millis(200), alerts.next())
            .await
            .is_ok(),
        "alert fires again after cooldown"
    );
}

#[tokio::test]
async fn test_healthy_reading_never_fires() {
    let bus = Arc::new(MemoryBus::new());
    let _engine = engine_on(&bus, "1s").await;
    let mut alerts = bus
        .subscribe("events.rules.>", DeliveryMode::Core)
        .await
        .unwrap();

    let mut state = EntityState::new(drone(), "drone");
    write_battery(&bus, &mut state, 80.0).await;

    assert!(
        tokio::time::timeout(Duration::from_millis(150), alerts.next())
            .await
            .is_err(),
        "healthy battery produces no alert"
    );
}

#[tokio::test]
async fn test_pattern_mismatch_never_fires() {
    let bus = Arc::new(MemoryBus::new());
    let _engine = engine_on(&bus, "1s").await;
    let mut alerts = bus
        .subscribe("events.rules.>", DeliveryMode::Core)
        .await
        .unwrap();

    // A ship, not a drone: the six-segment glob does not match.
    let ship = EntityId::parse("acme.plat1.maritime.port1.ship.042").unwrap();
    let registry = VocabularyRegistry::with_defaults();
    let mut state = EntityState::new(ship.clone(), "ship");
    state.merge(
        vec![Triple::new(
            ship.clone(),
            "robotics.battery.level",
            TripleObject::Number(5.0),
            "telemetry",
        )],
        &registry.snapshot(),
    );
    let kv = bus.kv(buckets::ENTITY_STATES).await.unwrap();
    kv.put(ship.as_str(), serde_json::to_vec(&state).unwrap())
        .await
        .unwrap();

    assert!(
        tokio::time::timeout(Duration::from_millis(150), alerts.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_firing_bound_over_wall_time() {
    let bus = Arc::new(MemoryBus::new());
    let _engine = engine_on(&bus, "200ms").await;
    let mut alerts = bus
        .subscribe("events.rules.>", DeliveryMode::Core)
        .await
        .unwrap();

    // Hammer low readings for ~500 ms; with cooldown T the engine may fire
    // at most ceil(wall/T) + 1 times.
    let mut state = EntityState::new(drone(), "drone");
    for _ in 0..10 {
        write_battery(&bus, &mut state, 10.0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut fired = 0;
    while alerts.try_next().is_some() {
        fired += 1;
    }
    assert!(fired >= 1, "at least one firing");
    assert!(fired <= 4, "cooldown bounds firings, saw {fired}");
}
