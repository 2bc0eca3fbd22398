//! # semstreams_msg — message & entity model
//!
//! The canonical wire representation for everything that moves through the
//! runtime: the [`Message`] envelope, payload capability contracts, federated
//! [`EntityId`]s, [`Triple`] assertions, the durable [`EntityState`] record,
//! and the process-wide [`VocabularyRegistry`].
//!
//! Payloads are value types. Capabilities (graphable, locatable, …) are
//! optional trait views discovered at runtime — absence of a capability
//! simply disables the corresponding downstream behaviour.

pub mod capability;
pub mod entity;
pub mod error;
pub mod message;
pub mod payload;
pub mod state;
pub mod triple;
pub mod vocabulary;

pub use capability::{
    Correlatable, Graphable, Locatable, Observable, Observation, Position, Processable, Timeable,
};
pub use entity::EntityId;
pub use error::ModelError;
pub use message::{Message, MessageMeta, MessageType, content_hash};
pub use payload::{EventPayload, GraphPayload, ObservationPayload, Payload, decode_payload};
pub use state::{Edge, EntityNode, EntityState, MergeOutcome};
pub use triple::{Triple, TripleObject};
pub use vocabulary::{Predicate, PredicateKind, Vocabulary, VocabularyRegistry};
