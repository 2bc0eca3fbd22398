//! # semstreams_graph — the graph processor
//!
//! Subscribes to the graph ingress subjects, turns *Graphable* payloads into
//! [`EntityState`](semstreams_msg::EntityState) mutations through a fixed
//! worker pool, persists them with compare-and-swap writes, and keeps five
//! families of secondary indexes converged behind a bounded window.
//!
//! The read path — traversal, alias resolution, predicate/incoming lookups,
//! spatial and temporal ranges, semantic similarity — lives in
//! [`QueryManager`], fronted on the bus by [`QueryService`].

pub mod cache;
pub mod config;
pub mod data_manager;
pub mod embed;
pub mod error;
pub mod index;
pub mod metrics;
pub mod processor;
pub mod query;
pub mod query_cache;
pub mod rate_limit;
pub mod sanitize;
pub mod service;
pub mod traverse;

pub use config::{EmbeddingConfig, GraphConfig};
pub use data_manager::DataManager;
pub use embed::{EmbeddingProvider, FallbackEmbedder, HttpEmbedder, LexicalEmbedder, cosine};
pub use error::GraphError;
pub use index::{IndexManager, IndexTask};
pub use metrics::GraphMetrics;
pub use processor::GraphProcessor;
pub use query::{Freshness, QueryManager};
pub use sanitize::sanitize;
pub use service::QueryService;
