//! Concrete payload types and capability discovery.
//!
//! A [`Payload`] serialises to JSON, self-validates, and may expose any of
//! the capability views from [`capability`](crate::capability). The provided
//! `as_*` methods default to `None`, so a payload only opts in to the
//! capabilities it actually has.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::{
    Correlatable, Graphable, Locatable, Observable, Observation, Position, Processable, Timeable,
};
use crate::entity::EntityId;
use crate::error::ModelError;
use crate::triple::{Triple, TripleObject};

/// A value payload with optional capability views.
pub trait Payload: Send + Sync {
    /// Serialise to JSON for the wire.
    fn to_json(&self) -> serde_json::Value;

    /// Self-validate.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Validation`] describing the first violation.
    fn validate(&self) -> Result<(), ModelError>;

    /// Graphable view, if the payload can produce entity state.
    fn as_graphable(&self) -> Option<&dyn Graphable> {
        None
    }

    /// Locatable view, if the payload carries a position.
    fn as_locatable(&self) -> Option<&dyn Locatable> {
        None
    }

    /// Timeable view, if the payload carries an observation time.
    fn as_timeable(&self) -> Option<&dyn Timeable> {
        None
    }

    /// Observable view, if the payload is a sensor reading.
    fn as_observable(&self) -> Option<&dyn Observable> {
        None
    }

    /// Correlatable view, if the payload carries a correlation ID.
    fn as_correlatable(&self) -> Option<&dyn Correlatable> {
        None
    }

    /// Processable view, if the payload carries priority/deadline hints.
    fn as_processable(&self) -> Option<&dyn Processable> {
        None
    }
}

// ── Graph payload ───────────────────────────────────────────────────────────

/// The standard graphable payload: an entity plus its triples.
///
/// This is what flows on the graph ingress subjects. Position and
/// observation time are optional extras that light up the locatable and
/// timeable capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPayload {
    /// Canonical entity ID.
    pub entity_id: EntityId,
    /// Entity type label (usually the fifth ID segment).
    #[serde(default)]
    pub entity_type: String,
    /// Assertions about the entity.
    pub triples: Vec<Triple>,
    /// Position at observation time, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Observation time, if distinct from message creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
    /// Correlation ID for tracing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Processing priority in `[0, 10]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

impl GraphPayload {
    /// Build a payload for an entity, deriving the type from the ID.
    #[must_use]
    pub fn new(entity_id: EntityId, triples: Vec<Triple>) -> Self {
        let entity_type = entity_id.entity_type().to_string();
        Self {
            entity_id,
            entity_type,
            triples,
            position: None,
            observed_at: None,
            correlation_id: None,
            priority: None,
        }
    }

    /// Attach a position.
    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

impl Payload for GraphPayload {
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn validate(&self) -> Result<(), ModelError> {
        for triple in &self.triples {
            triple.validate()?;
            if triple.subject != self.entity_id {
                return Err(ModelError::Validation(format!(
                    "triple subject {} does not match payload entity {}",
                    triple.subject, self.entity_id
                )));
            }
        }
        if let Some(p) = self.priority
            && p > 10
        {
            return Err(ModelError::Validation(format!("priority {p} out of range [0, 10]")));
        }
        if let Some(pos) = self.position
            && (!(-90.0..=90.0).contains(&pos.lat) || !(-180.0..=180.0).contains(&pos.lon))
        {
            return Err(ModelError::Validation(format!(
                "position ({}, {}) out of range",
                pos.lat, pos.lon
            )));
        }
        Ok(())
    }

    fn as_graphable(&self) -> Option<&dyn Graphable> {
        Some(self)
    }

    fn as_locatable(&self) -> Option<&dyn Locatable> {
        self.position.is_some().then_some(self as &dyn Locatable)
    }

    fn as_timeable(&self) -> Option<&dyn Timeable> {
        self.observed_at.is_some().then_some(self as &dyn Timeable)
    }

    fn as_correlatable(&self) -> Option<&dyn Correlatable> {
        self.correlation_id
            .is_some()
            .then_some(self as &dyn Correlatable)
    }

    fn as_processable(&self) -> Option<&dyn Processable> {
        self.priority.is_some().then_some(self as &dyn Processable)
    }
}

impl Graphable for GraphPayload {
    fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    fn triples(&self) -> Vec<Triple> {
        self.triples.clone()
    }
}

impl Locatable for GraphPayload {
    fn position(&self) -> Position {
        self.position.unwrap_or(Position {
            lat: 0.0,
            lon: 0.0,
            alt: None,
        })
    }
}

impl Timeable for GraphPayload {
    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at.unwrap_or_else(Utc::now)
    }
}

impl Correlatable for GraphPayload {
    fn correlation_id(&self) -> &str {
        self.correlation_id.as_deref().unwrap_or_default()
    }
}

impl Processable for GraphPayload {
    fn priority(&self) -> u8 {
        self.priority.unwrap_or(5)
    }
}

// ── Observation payload ─────────────────────────────────────────────────────

/// A single sensor reading about an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationPayload {
    /// The entity the reading is about.
    pub entity: EntityId,
    /// The measured property.
    pub property: String,
    /// The measured value.
    pub value: f64,
    /// Unit of measure.
    #[serde(default)]
    pub unit: String,
    /// Where the reading was taken, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// When the reading was taken.
    pub observed_at: DateTime<Utc>,
    /// Producing source label.
    #[serde(default)]
    pub source: String,
}

impl Payload for ObservationPayload {
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.property.is_empty() {
            return Err(ModelError::Validation("observation property is empty".into()));
        }
        Ok(())
    }

    fn as_graphable(&self) -> Option<&dyn Graphable> {
        Some(self)
    }

    fn as_locatable(&self) -> Option<&dyn Locatable> {
        self.position.is_some().then_some(self as &dyn Locatable)
    }

    fn as_timeable(&self) -> Option<&dyn Timeable> {
        Some(self)
    }

    fn as_observable(&self) -> Option<&dyn Observable> {
        Some(self)
    }
}

impl Graphable for ObservationPayload {
    fn entity_id(&self) -> &EntityId {
        &self.entity
    }

    fn triples(&self) -> Vec<Triple> {
        vec![
            Triple::new(
                self.entity.clone(),
                self.property.clone(),
                TripleObject::Number(self.value),
                self.source.clone(),
            )
            .with_timestamp(self.observed_at),
        ]
    }
}

impl Locatable for ObservationPayload {
    fn position(&self) -> Position {
        self.position.unwrap_or(Position {
            lat: 0.0,
            lon: 0.0,
            alt: None,
        })
    }
}

impl Timeable for ObservationPayload {
    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

impl Observable for ObservationPayload {
    fn observation(&self) -> Observation {
        Observation {
            entity: self.entity.clone(),
            property: self.property.clone(),
            value: self.value,
            unit: self.unit.clone(),
        }
    }
}

// ── Event payload ───────────────────────────────────────────────────────────

/// A free-form event payload with no graph capabilities.
///
/// Used by the logger, error reporting and anything that routes opaque JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    /// Event kind label.
    pub kind: String,
    /// Arbitrary event body.
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Payload for EventPayload {
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.kind.is_empty() {
            return Err(ModelError::Validation("event kind is empty".into()));
        }
        Ok(())
    }
}

// ── Decoding ────────────────────────────────────────────────────────────────

/// Decode a typed payload from its wire JSON by structural inspection.
///
/// Tries the known shapes in order of specificity. Returns `None` when the
/// value matches none of them — callers treat that as "capability absent",
/// not as an error.
#[must_use]
pub fn decode_payload(value: &serde_json::Value) -> Option<Box<dyn Payload>> {
    if value.get("entity_id").is_some() && value.get("triples").is_some() {
        if let Ok(p) = serde_json::from_value::<GraphPayload>(value.clone()) {
            return Some(Box::new(p));
        }
    }
    if value.get("entity").is_some() && value.get("property").is_some() {
        if let Ok(p) = serde_json::from_value::<ObservationPayload>(value.clone()) {
            return Some(Box::new(p));
        }
    }
    if value.get("kind").is_some() {
        if let Ok(p) = serde_json::from_value::<EventPayload>(value.clone()) {
            return Some(Box::new(p));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drone() -> EntityId {
        EntityId::parse("acme.plat1.robotics.gcs1.drone.001").unwrap()
    }

    #[test]
    fn test_graph_payload_capabilities() {
        let payload = GraphPayload::new(drone(), vec![]);
        assert!(payload.as_graphable().is_some());
        assert!(payload.as_locatable().is_none(), "no position, no capability");
        assert!(payload.as_observable().is_none());

        let located = payload.with_position(Position {
            lat: 37.7749,
            lon: -122.4194,
            alt: None,
        });
        assert!(located.as_locatable().is_some());
    }

    #[test]
    fn test_graph_payload_rejects_foreign_subject() {
        let other = EntityId::parse("acme.plat1.ops.hq.fleet.rescue").unwrap();
        let payload = GraphPayload::new(
            drone(),
            vec![Triple::new(other, "p", TripleObject::Bool(true), "t")],
        );
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_decode_payload_graph_shape() {
        let payload = GraphPayload::new(drone(), vec![]);
        let decoded = decode_payload(&payload.to_json()).expect("graph shape decodes");
        assert!(decoded.as_graphable().is_some());
    }

    #[test]
    fn test_decode_payload_unknown_shape() {
        let value = serde_json::json!({"unrelated": true});
        assert!(decode_payload(&value).is_none());
    }

    #[test]
    fn test_observation_becomes_triple() {
        let payload = ObservationPayload {
            entity: drone(),
            property: "robotics.battery.level".into(),
            value: 15.4,
            unit: "percent".into(),
            position: None,
            observed_at: Utc::now(),
            source: "telemetry".into(),
        };
        let graphable = payload.as_graphable().unwrap();
        let triples = graphable.triples();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].predicate, "robotics.battery.level");
        assert_eq!(triples[0].object.as_number(), Some(15.4));
    }
}
