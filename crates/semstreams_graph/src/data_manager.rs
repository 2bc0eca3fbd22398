//! The entity write path.
//!
//! Read-through L1 (bounded LRU) → L2 (TTL) → KV; triple merge under the
//! vocabulary's rules; write coalescing over a small window; CAS persistence
//! with a bumped monotonic version; index tasks emitted on every successful
//! write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error};

use semstreams_bus::{DEFAULT_CAS_ATTEMPTS, KvStore, update_with_retry};
use semstreams_msg::{EntityId, EntityState, Position, Triple, VocabularyRegistry};

use crate::cache::{TtlCache, bounded_lru};
use crate::config::GraphConfig;
use crate::error::GraphError;
use crate::index::IndexTask;
use crate::metrics::GraphMetrics;

/// One coalesced batch of pending triples for an entity.
struct PendingWrite {
    entity_type: String,
    triples: Vec<Triple>,
    position: Option<Position>,
    observed_at: DateTime<Utc>,
}

struct Inner {
    kv: Arc<dyn KvStore>,
    vocabulary: Arc<VocabularyRegistry>,
    l1: Mutex<lru::LruCache<EntityId, EntityState>>,
    l2: Mutex<TtlCache<EntityId, EntityState>>,
    pending: Mutex<HashMap<EntityId, PendingWrite>>,
    coalesce_window: Duration,
    index_tx: mpsc::Sender<IndexTask>,
    metrics: GraphMetrics,
}

/// Maintains the write path to `ENTITY_STATES`. Cheap to clone; all clones
/// share one cache and one coalescing queue, so there is a single writer
/// per entity shard.
#[derive(Clone)]
pub struct DataManager {
    inner: Arc<Inner>,
}

impl DataManager {
    /// Build the data manager on top of the entity bucket.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvStore>,
        vocabulary: Arc<VocabularyRegistry>,
        config: &GraphConfig,
        index_tx: mpsc::Sender<IndexTask>,
        metrics: GraphMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                kv,
                vocabulary,
                l1: Mutex::new(bounded_lru(config.l1_capacity)),
                l2: Mutex::new(TtlCache::new(
                    Duration::from_secs(config.l2_ttl_secs),
                    config.l2_capacity,
                )),
                pending: Mutex::new(HashMap::new()),
                coalesce_window: Duration::from_millis(config.coalesce_window_ms),
                index_tx,
                metrics,
            }),
        }
    }

    /// Queue triples for an entity. Updates arriving within the coalescing
    /// window are merged into a single CAS write.
    pub async fn upsert(
        &self,
        entity_id: EntityId,
        entity_type: String,
        triples: Vec<Triple>,
        position: Option<Position>,
        observed_at: DateTime<Utc>,
    ) -> Result<(), GraphError> {
        let scheduled = {
            let mut pending = self.lock_pending();
            match pending.get_mut(&entity_id) {
                Some(existing) => {
                    existing.triples.extend(triples);
                    if position.is_some() {
                        existing.position = position;
                    }
                    existing.observed_at = existing.observed_at.max(observed_at);
                    false
                }
                None => {
                    pending.insert(
                        entity_id.clone(),
                        PendingWrite {
                            entity_type,
                            triples,
                            position,
                            observed_at,
                        },
                    );
                    true
                }
            }
        };

        if scheduled {
            let manager = self.clone();
            let id = entity_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(manager.inner.coalesce_window).await;
                if let Err(error) = manager.flush(&id).await {
                    error!(entity = %id, %error, "entity flush failed");
                    manager
                        .inner
                        .metrics
                        .messages_errors
                        .with_label_values(&["flush"])
                        .inc();
                }
            });
        }
        Ok(())
    }

    /// Write one entity's pending batch now. Public so tests and shutdown
    /// can force convergence without waiting for the window.
    pub async fn flush(&self, entity_id: &EntityId) -> Result<(), GraphError> {
        let Some(batch) = self.lock_pending().remove(entity_id) else {
            return Ok(());
        };

        let vocabulary = self.inner.vocabulary.snapshot();
        let mut result: Option<(EntityState, IndexTask)> = None;

        update_with_retry(
            self.inner.kv.as_ref(),
            entity_id.as_str(),
            DEFAULT_CAS_ATTEMPTS,
            |current| {
                let mut state = match current {
                    Some(bytes) => serde_json::from_slice::<EntityState>(bytes).map_err(|e| {
                        semstreams_bus::BusError::Kv {
                            bucket: "ENTITY_STATES".into(),
                            message: format!("corrupt state for {entity_id}: {e}"),
                        }
                    })?,
                    None => EntityState::new(entity_id.clone(), batch.entity_type.clone()),
                };

                let outcome = state.merge(batch.triples.clone(), &vocabulary);
                if !outcome.changed {
                    result = None;
                    return Ok(None);
                }

                let task = IndexTask {
                    entity_id: entity_id.clone(),
                    entity_type: state.node.entity_type.clone(),
                    before_triples: outcome.before_triples,
                    after_triples: outcome.after_triples,
                    before_edges: outcome.before_edges,
                    after_edges: outcome.after_edges,
                    position: batch.position,
                    observed_at: batch.observed_at,
                };
                let bytes =
                    serde_json::to_vec(&state).map_err(|e| semstreams_bus::BusError::Kv {
                        bucket: "ENTITY_STATES".into(),
                        message: e.to_string(),
                    })?;
                result = Some((state, task));
                Ok(Some(bytes))
            },
        )
        .await?;

        if let Some((state, task)) = result {
            debug!(entity = %entity_id, version = state.version, "entity state written");
            self.cache_insert(state);
            if self.inner.index_tx.send(task).await.is_err() {
                error!("index task channel closed");
            }
        }
        Ok(())
    }

    /// Read an entity through the cache tiers.
    pub async fn get(&self, entity_id: &EntityId) -> Result<Option<EntityState>, GraphError> {
        {
            let mut l1 = self.lock_l1();
            if let Some(state) = l1.get(entity_id) {
                self.inner
                    .metrics
                    .cache_ops
                    .with_label_values(&["l1", "hit"])
                    .inc();
                return Ok(Some(state.clone()));
            }
        }
        self.inner
            .metrics
            .cache_ops
            .with_label_values(&["l1", "miss"])
            .inc();

        {
            let mut l2 = self.lock_l2();
            if let Some(state) = l2.get(entity_id) {
                self.inner
                    .metrics
                    .cache_ops
                    .with_label_values(&["l2", "hit"])
                    .inc();
                self.lock_l1().put(entity_id.clone(), state.clone());
                return Ok(Some(state));
            }
        }
        self.inner
            .metrics
            .cache_ops
            .with_label_values(&["l2", "miss"])
            .inc();

        let Some(entry) = self.inner.kv.get(entity_id.as_str()).await? else {
            return Ok(None);
        };
        let state: EntityState =
            serde_json::from_slice(&entry.value).map_err(|e| GraphError::CorruptValue {
                key: entity_id.as_str().to_string(),
                source: e,
            })?;
        self.cache_insert(state.clone());
        Ok(Some(state))
    }

    /// Whether a write for this entity is still queued or in flight.
    #[must_use]
    pub fn has_pending(&self, entity_id: &EntityId) -> bool {
        self.lock_pending().contains_key(entity_id)
    }

    fn cache_insert(&self, state: EntityState) {
        let id = state.node.id.clone();
        self.lock_l1().put(id.clone(), state.clone());
        self.lock_l2().insert(id, state);
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<EntityId, PendingWrite>> {
        match self.inner.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_l1(&self) -> std::sync::MutexGuard<'_, lru::LruCache<EntityId, EntityState>> {
        match self.inner.l1.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_l2(&self) -> std::sync::MutexGuard<'_, TtlCache<EntityId, EntityState>> {
        match self.inner.l2.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semstreams_bus::{MemoryBus, MessageBus};
    use semstreams_msg::TripleObject;

    fn drone() -> EntityId {
        EntityId::parse("acme.plat1.robotics.gcs1.drone.001").unwrap()
    }

    async fn manager() -> (DataManager, mpsc::Receiver<IndexTask>) {
        let bus = MemoryBus::new();
        let kv = bus.kv("ENTITY_STATES").await.unwrap();
        let (tx, rx) = mpsc::channel(64);
        let config = GraphConfig {
            coalesce_window_ms: 1,
            ..GraphConfig::default()
        };
        let manager = DataManager::new(
            kv,
            Arc::new(VocabularyRegistry::with_defaults()),
            &config,
            tx,
            GraphMetrics::unregistered(),
        );
        (manager, rx)
    }

    fn battery(level: f64) -> Triple {
        Triple::new(
            drone(),
            "robotics.battery.level",
            TripleObject::Number(level),
            "test",
        )
    }

    #[tokio::test]
    async fn test_upsert_then_get() {
        let (manager, mut rx) = manager().await;
        manager
            .upsert(drone(), "drone".into(), vec![battery(42.0)], None, Utc::now())
            .await
            .unwrap();
        manager.flush(&drone()).await.unwrap();

        let state = manager.get(&drone()).await.unwrap().unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(
            state.current("robotics.battery.level").unwrap().object.as_number(),
            Some(42.0)
        );

        let task = rx.recv().await.unwrap();
        assert_eq!(task.entity_id, drone());
        assert!(task.before_triples.is_empty());
        assert_eq!(task.after_triples.len(), 1);
    }

    #[tokio::test]
    async fn test_coalescing_merges_batches() {
        let (manager, mut rx) = manager().await;
        let ts = Utc::now();
        manager
            .upsert(drone(), "drone".into(), vec![battery(42.0)], None, ts)
            .await
            .unwrap();
        manager
            .upsert(
                drone(),
                "drone".into(),
                vec![Triple::new(
                    drone(),
                    "identifier.callsign",
                    TripleObject::Text("ALPHA-1".into()),
                    "test",
                )],
                None,
                ts,
            )
            .await
            .unwrap();
        manager.flush(&drone()).await.unwrap();

        let state = manager.get(&drone()).await.unwrap().unwrap();
        assert_eq!(state.version, 1, "both updates coalesced into one write");
        assert_eq!(state.triples.len(), 2);

        let task = rx.recv().await.unwrap();
        assert_eq!(task.after_triples.len(), 2);
    }

    #[tokio::test]
    async fn test_idempotent_reapply_no_new_version() {
        let (manager, _rx) = manager().await;
        let triple = battery(42.0);
        manager
            .upsert(drone(), "drone".into(), vec![triple.clone()], None, Utc::now())
            .await
            .unwrap();
        manager.flush(&drone()).await.unwrap();
        manager
            .upsert(drone(), "drone".into(), vec![triple], None, Utc::now())
            .await
            .unwrap();
        manager.flush(&drone()).await.unwrap();

        let state = manager.get(&drone()).await.unwrap().unwrap();
        assert_eq!(state.version, 1, "same merge twice is one logical change");
    }

    #[tokio::test]
    async fn test_get_missing_entity() {
        let (manager, _rx) = manager().await;
        assert!(manager.get(&drone()).await.unwrap().is_none());
    }
}
