//! Triple assertions — the atomic unit of graph state.
//!
//! A [`Triple`] is `(subject, predicate, object)` plus provenance: source,
//! timestamp, confidence and optional context/datatype. Subjects are always
//! entity IDs; objects are entity IDs for relationship predicates and plain
//! values otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::ModelError;

/// The object position of a triple.
///
/// Serialised as a bare JSON value. On decode, a string that parses as a
/// six-segment entity ID becomes [`TripleObject::Entity`]; anything else
/// stays a plain value.
#[derive(Debug, Clone, PartialEq)]
pub enum TripleObject {
    /// A reference to another entity (relationship object).
    Entity(EntityId),
    /// A textual value.
    Text(String),
    /// A numeric value.
    Number(f64),
    /// A boolean value.
    Bool(bool),
}

impl TripleObject {
    /// Returns the referenced entity ID, if this object is one.
    #[must_use]
    pub fn as_entity(&self) -> Option<&EntityId> {
        match self {
            Self::Entity(id) => Some(id),
            _ => None,
        }
    }

    /// Returns the numeric value, if any.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the textual value, if any. Entity references render as their ID.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Entity(id) => Some(id.as_str()),
            _ => None,
        }
    }

    /// A canonical string form used for identity comparison and index keys.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Entity(id) => id.as_str().to_string(),
            Self::Text(s) => s.clone(),
            Self::Number(n) => format!("{n}"),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl Serialize for TripleObject {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Entity(id) => serializer.serialize_str(id.as_str()),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

impl<'de> Deserialize<'de> for TripleObject {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => Ok(match EntityId::parse(s.clone()) {
                Ok(id) => Self::Entity(id),
                Err(_) => Self::Text(s),
            }),
            serde_json::Value::Number(n) => Ok(Self::Number(n.as_f64().unwrap_or(0.0))),
            serde_json::Value::Bool(b) => Ok(Self::Bool(b)),
            other => Err(serde::de::Error::custom(format!(
                "triple object must be string, number or bool, got {other}"
            ))),
        }
    }
}

/// One graph assertion with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triple {
    /// The entity this assertion is about.
    pub subject: EntityId,
    /// Dotted predicate, e.g. `robotics.battery.level` or `graph.rel.belongs_to`.
    pub predicate: String,
    /// The asserted value or target entity.
    pub object: TripleObject,
    /// The component or feed that produced this assertion.
    pub source: String,
    /// When the assertion was observed (not when the message was created).
    pub timestamp: DateTime<Utc>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Optional free-form context tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Optional datatype annotation (vocabulary-defined).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

impl Triple {
    /// Build a triple with full confidence and the current time.
    #[must_use]
    pub fn new(
        subject: EntityId,
        predicate: impl Into<String>,
        object: TripleObject,
        source: impl Into<String>,
    ) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object,
            source: source.into(),
            timestamp: Utc::now(),
            confidence: 1.0,
            context: None,
            datatype: None,
        }
    }

    /// Override the observation timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Override the confidence.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// The merge identity `(subject, predicate, object)`.
    ///
    /// Two triples with equal identity are the same assertion; the merge
    /// policy decides which provenance survives.
    #[must_use]
    pub fn identity(&self) -> (String, String, String) {
        (
            self.subject.as_str().to_string(),
            self.predicate.clone(),
            self.object.canonical(),
        )
    }

    /// Validate predicate shape and confidence range.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidPredicate`] or
    /// [`ModelError::ConfidenceOutOfRange`].
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.predicate.is_empty()
            || !self
                .predicate
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_')
        {
            return Err(ModelError::InvalidPredicate(self.predicate.clone()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ModelError::ConfidenceOutOfRange(self.confidence));
        }
        Ok(())
    }

    /// Returns `true` if `self` should replace `other` under the merge
    /// policy: newer timestamp wins, ties broken by higher confidence, then
    /// by source lexicographic order.
    #[must_use]
    pub fn wins_over(&self, other: &Triple) -> bool {
        if self.timestamp != other.timestamp {
            return self.timestamp > other.timestamp;
        }
        if self.confidence != other.confidence {
            return self.confidence > other.confidence;
        }
        self.source > other.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> EntityId {
        EntityId::parse("acme.plat1.robotics.gcs1.drone.001").unwrap()
    }

    #[test]
    fn test_object_decodes_entity_reference() {
        let obj: TripleObject = serde_json::from_str("\"acme.plat1.ops.hq.fleet.rescue\"").unwrap();
        assert!(obj.as_entity().is_some());
    }

    #[test]
    fn test_object_decodes_plain_text() {
        let obj: TripleObject = serde_json::from_str("\"ALPHA-1\"").unwrap();
        assert!(obj.as_entity().is_none());
        assert_eq!(obj.as_text(), Some("ALPHA-1"));
    }

    #[test]
    fn test_object_decodes_number() {
        let obj: TripleObject = serde_json::from_str("15.4").unwrap();
        assert_eq!(obj.as_number(), Some(15.4));
    }

    #[test]
    fn test_serde_roundtrip() {
        let triple = Triple::new(
            subject(),
            "robotics.battery.level",
            TripleObject::Number(42.0),
            "test",
        );
        let json = serde_json::to_string(&triple).unwrap();
        let restored: Triple = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.identity(), triple.identity());
        assert_eq!(restored.timestamp, triple.timestamp);
    }

    #[test]
    fn test_merge_precedence_newer_timestamp_wins() {
        let older = Triple::new(subject(), "p", TripleObject::Number(1.0), "a")
            .with_timestamp("2026-01-01T00:00:00Z".parse().unwrap());
        let newer = Triple::new(subject(), "p", TripleObject::Number(2.0), "a")
            .with_timestamp("2026-01-02T00:00:00Z".parse().unwrap());
        assert!(newer.wins_over(&older));
        assert!(!older.wins_over(&newer));
    }

    #[test]
    fn test_merge_precedence_tie_breaks() {
        let ts: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let low = Triple::new(subject(), "p", TripleObject::Number(1.0), "a")
            .with_timestamp(ts)
            .with_confidence(0.4);
        let high = Triple::new(subject(), "p", TripleObject::Number(1.0), "a")
            .with_timestamp(ts)
            .with_confidence(0.9);
        assert!(high.wins_over(&low));

        let src_a = Triple::new(subject(), "p", TripleObject::Number(1.0), "alpha").with_timestamp(ts);
        let src_b = Triple::new(subject(), "p", TripleObject::Number(1.0), "beta").with_timestamp(ts);
        assert!(src_b.wins_over(&src_a), "source tie-break is lexicographic");
    }

    #[test]
    fn test_validate_rejects_bad_predicate() {
        let t = Triple::new(subject(), "bad predicate!", TripleObject::Bool(true), "t");
        assert!(t.validate().is_err());
    }
}
