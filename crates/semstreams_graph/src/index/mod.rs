//! Secondary index maintenance.
//!
//! Each index family runs on its own task fed from a fan-out of
//! [`IndexTask`]s emitted by the data manager. Every write goes through
//! `update_with_retry`, so concurrent writers are race-free without locks.
//! The system is eventually consistent: between the entity write and its
//! index updates a reader may observe a not-yet-discoverable reverse edge —
//! the query layer surfaces this as a freshness hint rather than papering
//! over it.

pub mod alias;
pub mod embedding;
pub mod incoming;
pub mod predicate;
pub mod spatial;
pub mod temporal;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use semstreams_bus::{MessageBus, buckets};
use semstreams_msg::{Edge, EntityId, Position, Triple, VocabularyRegistry};

use crate::config::GraphConfig;
use crate::embed::FallbackEmbedder;
use crate::error::GraphError;
use crate::metrics::GraphMetrics;

pub use alias::AliasIndexer;
pub use embedding::{EmbeddingIndexer, EmbeddingRecord};
pub use incoming::IncomingIndexer;
pub use predicate::PredicateIndexer;
pub use spatial::{SpatialBin, SpatialEntry, SpatialIndexer, bin_for, bin_key, multiplier};
pub use temporal::{TemporalBucket, TemporalEvent, TemporalIndexer, hour_key, hour_keys_between};

/// Capacity of each family's task channel.
const FAMILY_QUEUE: usize = 4_096;

/// One unit of index work: the entity and its before/after snapshots.
#[derive(Debug, Clone)]
pub struct IndexTask {
    /// The written entity.
    pub entity_id: EntityId,
    /// Its type label.
    pub entity_type: String,
    /// Triples before the merge.
    pub before_triples: Vec<Triple>,
    /// Triples after the merge.
    pub after_triples: Vec<Triple>,
    /// Edges before the merge.
    pub before_edges: Vec<Edge>,
    /// Edges after the merge.
    pub after_edges: Vec<Edge>,
    /// Position carried by the payload, if any (triples may also carry
    /// latitude/longitude predicates).
    pub position: Option<Position>,
    /// Observation time for temporal bucketing.
    pub observed_at: DateTime<Utc>,
}

/// Applies one family's update for a task.
#[async_trait::async_trait]
pub trait IndexFamily: Send + Sync {
    /// Family label used in metrics.
    fn family(&self) -> &'static str;

    /// Apply the update.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] on unrecoverable KV failures; the manager
    /// records the failure and moves on.
    async fn apply(&self, task: &IndexTask) -> Result<(), GraphError>;
}

/// Owns the family updater tasks and the fan-out loop.
pub struct IndexManager {
    families: Vec<Arc<dyn IndexFamily>>,
    metrics: GraphMetrics,
}

impl IndexManager {
    /// Open all index buckets and construct the family updaters.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Bus`] if a bucket cannot be opened.
    pub async fn new(
        bus: &dyn MessageBus,
        vocabulary: Arc<VocabularyRegistry>,
        config: &GraphConfig,
        metrics: GraphMetrics,
    ) -> Result<Self, GraphError> {
        let mut families: Vec<Arc<dyn IndexFamily>> = vec![
            Arc::new(PredicateIndexer::new(bus.kv(buckets::PREDICATE_INDEX).await?)),
            Arc::new(IncomingIndexer::new(bus.kv(buckets::INCOMING_INDEX).await?)),
            Arc::new(AliasIndexer::new(
                bus.kv(buckets::ALIAS_INDEX).await?,
                Arc::clone(&vocabulary),
            )),
            Arc::new(SpatialIndexer::new(
                bus.kv(buckets::SPATIAL_INDEX).await?,
                config.spatial_precision,
            )),
            Arc::new(TemporalIndexer::new(bus.kv(buckets::TEMPORAL_INDEX).await?)),
        ];

        if config.embedding.enabled {
            let embedder = FallbackEmbedder::from_config(
                &config.embedding,
                metrics.embedding_fallbacks.clone(),
            )?;
            families.push(Arc::new(EmbeddingIndexer::new(
                bus.kv(buckets::EMBEDDING_INDEX).await?,
                bus.kv(buckets::EMBEDDING_DEDUP).await?,
                Arc::new(embedder),
                config.embedding.fields.clone(),
            )));
        }

        Ok(Self { families, metrics })
    }

    /// Spawn one updater task per family plus the fan-out loop. Returns the
    /// fan-out handle; family tasks end when their channels close.
    #[must_use]
    pub fn spawn(self, mut tasks: mpsc::Receiver<IndexTask>) -> JoinHandle<()> {
        let mut senders = Vec::with_capacity(self.families.len());
        for family in self.families {
            let (tx, mut rx) = mpsc::channel::<IndexTask>(FAMILY_QUEUE);
            let metrics = self.metrics.clone();
            senders.push(tx);
            tokio::spawn(async move {
                while let Some(task) = rx.recv().await {
                    let started = Instant::now();
                    match family.apply(&task).await {
                        Ok(()) => {
                            metrics.index_updates.with_label_values(&[family.family()]).inc();
                        }
                        Err(error) => {
                            warn!(
                                family = family.family(),
                                entity = %task.entity_id,
                                %error,
                                "index update failed"
                            );
                            metrics
                                .index_failures
                                .with_label_values(&[family.family()])
                                .inc();
                        }
                    }
                    metrics
                        .index_latency
                        .with_label_values(&[family.family()])
                        .observe(started.elapsed().as_secs_f64());
                }
            });
        }

        tokio::spawn(async move {
            while let Some(task) = tasks.recv().await {
                for sender in &senders {
                    if sender.send(task.clone()).await.is_err() {
                        error!("index family channel closed");
                    }
                }
            }
        })
    }
}

// ── Shared helpers for list-valued index buckets ────────────────────────────

/// Decode a JSON string list, tolerating absent values.
pub(crate) fn decode_list(bytes: Option<&[u8]>) -> Vec<String> {
    bytes
        .and_then(|b| serde_json::from_slice(b).ok())
        .unwrap_or_default()
}

/// Encode a string list.
pub(crate) fn encode_list(list: &[String]) -> Result<Vec<u8>, semstreams_bus::BusError> {
    serde_json::to_vec(list).map_err(semstreams_bus::BusError::Codec)
}
