//! Payload capability contracts.
//!
//! Capabilities are small optional trait views on a payload. Components test
//! for each one via the `as_*` accessors on [`Payload`](crate::payload::Payload);
//! absence is not an error, it just disables the corresponding behaviour
//! downstream.

use chrono::{DateTime, Utc};

use crate::entity::EntityId;
use crate::triple::Triple;

/// A geographic position.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Position {
    /// Latitude in degrees, `[-90, 90]`.
    pub lat: f64,
    /// Longitude in degrees, `[-180, 180]`.
    pub lon: f64,
    /// Optional altitude in metres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
}

/// A sensor-style reading.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Observation {
    /// The entity the reading is about.
    pub entity: EntityId,
    /// The measured property (a dotted predicate).
    pub property: String,
    /// The measured value.
    pub value: f64,
    /// Unit of measure, e.g. `"percent"`.
    pub unit: String,
}

/// The payload can be turned into graph state.
pub trait Graphable {
    /// The canonical entity this payload describes.
    fn entity_id(&self) -> &EntityId;
    /// Triples to merge into the entity's state.
    fn triples(&self) -> Vec<Triple>;
}

/// The payload carries a geographic position.
pub trait Locatable {
    /// The position of the subject at observation time.
    fn position(&self) -> Position;
}

/// The payload carries an observation time distinct from message creation.
pub trait Timeable {
    /// When the underlying phenomenon was observed.
    fn observed_at(&self) -> DateTime<Utc>;
}

/// The payload is a sensor reading.
pub trait Observable {
    /// The reading.
    fn observation(&self) -> Observation;
}

/// The payload participates in distributed tracing.
pub trait Correlatable {
    /// Correlation identifier linking related messages.
    fn correlation_id(&self) -> &str;
}

/// The payload carries processing hints.
pub trait Processable {
    /// Priority in `[0, 10]`; higher is more urgent.
    fn priority(&self) -> u8;
    /// Optional processing deadline.
    fn deadline(&self) -> Option<DateTime<Utc>> {
        None
    }
}
