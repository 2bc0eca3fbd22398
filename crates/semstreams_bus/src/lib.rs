//! # semstreams_bus — the message bus abstraction
//!
//! A uniform pub/sub, request/reply, KV and object-store API over the
//! transport. Two implementations are provided:
//!
//! - [`MemoryBus`] — fully in-process, used by tests and single-binary
//!   deployments;
//! - [`NatsBus`] — `async-nats` core for pub/sub and request/reply, JetStream
//!   for durable streams, KV buckets and the object store.
//!
//! Delivery semantics: core subscriptions are at-most-once (overflow drops),
//! durable subscriptions are at-least-once (persisted, replayable). All
//! handlers downstream must therefore be idempotent on message hash.

pub mod buckets;
pub mod bus;
pub mod codec;
pub mod error;
pub mod memory;
pub mod nats;
pub mod subject;

pub use bus::{
    DEFAULT_CAS_ATTEMPTS, Delivery, DeliveryMode, KvEntry, KvStore, MessageBus, ObjectStore,
    Subscription, WatchEvent, WatchOp, WatchStart, update_with_retry,
};
pub use error::BusError;
pub use memory::MemoryBus;
pub use nats::NatsBus;
