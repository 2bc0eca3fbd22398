//! The read path: plan + cache + rate limit.
//!
//! Every operation takes a request envelope and returns a result plus a
//! freshness hint. Results may be served from the bounded LRU+TTL cache;
//! exceeding a per-op token bucket fails with a retryable error rather than
//! blocking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use semstreams_bus::{KvStore, MessageBus, buckets};
use semstreams_msg::{EntityId, EntityState};

use crate::config::GraphConfig;
use crate::data_manager::DataManager;
use crate::embed::{EmbeddingProvider, FallbackEmbedder, cosine};
use crate::error::GraphError;
use crate::index::{
    EmbeddingRecord, SpatialBin, SpatialEntry, TemporalBucket, TemporalEvent, alias, bin_for,
    bin_key, hour_keys_between,
};
use crate::metrics::GraphMetrics;
use crate::query_cache::{QueryCache, QueryKey};
use crate::rate_limit::TokenBucket;
use crate::sanitize::sanitize;
use crate::traverse::{TraverseRequest, TraverseResult, traverse};

/// Query-layer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Token-bucket rate per query type, per second.
    pub rate_per_sec: f64,
    /// Result cache capacity.
    pub cache_capacity: usize,
    /// Result cache TTL in milliseconds.
    pub cache_ttl_ms: u64,
    /// How long after a write the indexes are assumed converged.
    pub convergence_window_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 100.0,
            cache_capacity: 1_024,
            cache_ttl_ms: 5_000,
            convergence_window_ms: 150,
        }
    }
}

/// Index convergence hint returned with read results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Freshness {
    /// Whether secondary indexes have likely converged for this entity.
    pub converged: bool,
    /// When the hint was computed.
    pub as_of: DateTime<Utc>,
}

// ── Request/response envelopes ──────────────────────────────────────────────

/// `get_entity` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityResponse {
    /// The entity, if present.
    pub entity: Option<EntityState>,
    /// Convergence hint.
    pub freshness: Freshness,
}

/// `resolve_alias` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasResponse {
    /// The resolved entity ID, if the alias is known.
    pub resolved: Option<EntityId>,
    /// The resolved entity's state.
    pub entity: Option<EntityState>,
}

/// Paging for list queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Page {
    /// Entries to skip.
    pub offset: usize,
    /// Maximum entries to return.
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

/// `by_predicate` / `incoming` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    /// Matching entity states.
    pub entities: Vec<EntityState>,
    /// Total matches before paging.
    pub total: usize,
    /// Whether paging clipped the result.
    pub truncated: bool,
}

/// `nearby` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyRequest {
    /// Centre latitude.
    pub lat: f64,
    /// Centre longitude.
    pub lon: f64,
    /// Precision level, 4–8 (defaults to the index precision).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    /// How many bins out from the centre to fetch.
    #[serde(default = "default_radius_bins")]
    pub radius_bins: i64,
}

fn default_radius_bins() -> i64 {
    1
}

/// `nearby` response. Entities are returned bin-resolution as-is; distance
/// refinement is the caller's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyResponse {
    /// Entity ID → last known position.
    pub entities: HashMap<String, SpatialEntry>,
}

/// `active_in` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalRequest {
    /// Window start (inclusive).
    pub from: DateTime<Utc>,
    /// Window end (inclusive).
    pub to: DateTime<Utc>,
}

/// `active_in` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalResponse {
    /// All touches in the window, oldest bucket first.
    pub events: Vec<TemporalEvent>,
    /// Distinct entities across the window.
    pub entity_count: u64,
}

/// `semantic` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticRequest {
    /// Query text.
    pub text: String,
    /// Maximum hits.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Minimum cosine similarity.
    #[serde(default)]
    pub threshold: f32,
}

fn default_k() -> usize {
    10
}

/// One semantic hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticHit {
    /// The entity.
    pub entity: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// `semantic` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticResponse {
    /// Hits, best first.
    pub hits: Vec<SemanticHit>,
}

// ── Manager ─────────────────────────────────────────────────────────────────

/// Serves all read operations against the KV state and indexes.
pub struct QueryManager {
    data: DataManager,
    entities: Arc<dyn KvStore>,
    predicate: Arc<dyn KvStore>,
    incoming: Arc<dyn KvStore>,
    alias: Arc<dyn KvStore>,
    spatial: Arc<dyn KvStore>,
    temporal: Arc<dyn KvStore>,
    embedding: Arc<dyn KvStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    cache: QueryCache,
    limits: HashMap<&'static str, TokenBucket>,
    config: QueryConfig,
    spatial_precision: u8,
    metrics: GraphMetrics,
}

const OPS: [&str; 8] = [
    "entity",
    "alias",
    "predicate",
    "incoming",
    "traverse",
    "nearby",
    "temporal",
    "semantic",
];

impl QueryManager {
    /// Open the index buckets and build the manager.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Bus`] if a bucket cannot be opened.
    pub async fn new(
        bus: &dyn MessageBus,
        data: DataManager,
        graph_config: &GraphConfig,
        config: QueryConfig,
        metrics: GraphMetrics,
    ) -> Result<Self, GraphError> {
        let embedder: Option<Arc<dyn EmbeddingProvider>> = if graph_config.embedding.enabled {
            Some(Arc::new(FallbackEmbedder::from_config(
                &graph_config.embedding,
                metrics.embedding_fallbacks.clone(),
            )?))
        } else {
            None
        };

        let limits = OPS
            .into_iter()
            .map(|op| (op, TokenBucket::new(config.rate_per_sec)))
            .collect();

        Ok(Self {
            data,
            entities: bus.kv(buckets::ENTITY_STATES).await?,
            predicate: bus.kv(buckets::PREDICATE_INDEX).await?,
            incoming: bus.kv(buckets::INCOMING_INDEX).await?,
            alias: bus.kv(buckets::ALIAS_INDEX).await?,
            spatial: bus.kv(buckets::SPATIAL_INDEX).await?,
            temporal: bus.kv(buckets::TEMPORAL_INDEX).await?,
            embedding: bus.kv(buckets::EMBEDDING_INDEX).await?,
            embedder,
            cache: QueryCache::new(
                config.cache_capacity,
                Duration::from_millis(config.cache_ttl_ms),
            ),
            limits,
            spatial_precision: graph_config.spatial_precision,
            config,
            metrics,
        })
    }

    fn admit(&self, op: &'static str) -> Result<Instant, GraphError> {
        let allowed = self.limits.get(op).is_none_or(TokenBucket::try_acquire);
        if !allowed {
            self.metrics.queries_rate_limited.with_label_values(&[op]).inc();
            return Err(GraphError::RateLimited { op });
        }
        self.metrics.queries.with_label_values(&[op]).inc();
        Ok(Instant::now())
    }

    fn observe(&self, op: &str, started: Instant) {
        self.metrics
            .query_latency
            .with_label_values(&[op])
            .observe(started.elapsed().as_secs_f64());
    }

    fn freshness_for(&self, entity: Option<&EntityState>) -> Freshness {
        let window = chrono::Duration::milliseconds(self.config.convergence_window_ms as i64);
        let converged = entity.is_none_or(|state| {
            !self.data.has_pending(&state.node.id) && Utc::now() - state.updated_at > window
        });
        Freshness {
            converged,
            as_of: Utc::now(),
        }
    }

    /// Direct entity fetch.
    ///
    /// # Errors
    ///
    /// [`GraphError::RateLimited`] or KV failures.
    pub async fn get_entity(&self, id: &EntityId) -> Result<EntityResponse, GraphError> {
        let started = self.admit("entity")?;
        let entity = self.data.get(id).await?;
        let freshness = self.freshness_for(entity.as_ref());
        self.observe("entity", started);
        Ok(EntityResponse { entity, freshness })
    }

    /// Resolve an alias to its entity. The lookup sanitises the alias the
    /// same way the indexer does, so `"ALPHA-1"` and `"alpha 1"` resolve
    /// identically.
    ///
    /// # Errors
    ///
    /// [`GraphError::RateLimited`] or KV failures.
    pub async fn resolve_alias(&self, raw: &str) -> Result<AliasResponse, GraphError> {
        let started = self.admit("alias")?;
        let key = alias::alias_key(raw);
        let resolved = match self.alias.get(&key).await? {
            Some(entry) => {
                let id: String = serde_json::from_slice(&entry.value).unwrap_or_default();
                EntityId::parse(id).ok()
            }
            None => None,
        };
        let entity = match &resolved {
            Some(id) => self.data.get(id).await?,
            None => None,
        };
        self.observe("alias", started);
        Ok(AliasResponse { resolved, entity })
    }

    /// Entities asserting a predicate, bulk-loaded and paged.
    ///
    /// # Errors
    ///
    /// [`GraphError::RateLimited`] or KV failures.
    pub async fn by_predicate(
        &self,
        predicate: &str,
        page: Page,
    ) -> Result<ListResponse, GraphError> {
        let started = self.admit("predicate")?;
        let key = QueryKey::new("predicate", &(predicate, page.offset, page.limit));
        if let Some(cached) = self.cache.get(&key) {
            self.metrics.cache_ops.with_label_values(&["query", "hit"]).inc();
            self.observe("predicate", started);
            return Ok(serde_json::from_value(cached)?);
        }
        self.metrics.cache_ops.with_label_values(&["query", "miss"]).inc();

        let ids = match self.predicate.get(&sanitize(predicate)).await? {
            Some(entry) => serde_json::from_slice::<Vec<String>>(&entry.value).unwrap_or_default(),
            None => Vec::new(),
        };
        let response = self.load_page(ids, page).await?;
        self.cache.insert(key, serde_json::to_value(&response)?);
        self.observe("predicate", started);
        Ok(response)
    }

    /// Reverse-edge lookup: who points at this entity?
    ///
    /// # Errors
    ///
    /// [`GraphError::RateLimited`] or KV failures.
    pub async fn incoming(&self, target: &EntityId, page: Page) -> Result<ListResponse, GraphError> {
        let started = self.admit("incoming")?;
        let ids = match self.incoming.get(target.as_str()).await? {
            Some(entry) => serde_json::from_slice::<Vec<String>>(&entry.value).unwrap_or_default(),
            None => Vec::new(),
        };
        let response = self.load_page(ids, page).await?;
        self.observe("incoming", started);
        Ok(response)
    }

    async fn load_page(&self, ids: Vec<String>, page: Page) -> Result<ListResponse, GraphError> {
        let total = ids.len();
        let mut entities = Vec::new();
        for id in ids.iter().skip(page.offset).take(page.limit) {
            if let Ok(parsed) = EntityId::parse(id.clone())
                && let Some(state) = self.data.get(&parsed).await?
            {
                entities.push(state);
            }
        }
        let truncated = page.offset + entities.len() < total;
        Ok(ListResponse {
            entities,
            total,
            truncated,
        })
    }

    /// Bounded decay-weighted traversal.
    ///
    /// # Errors
    ///
    /// [`GraphError::RateLimited`] or KV failures.
    pub async fn traverse(&self, request: &TraverseRequest) -> Result<TraverseResult, GraphError> {
        let started = self.admit("traverse")?;
        let result = traverse(self.entities.as_ref(), self.incoming.as_ref(), request).await?;
        self.observe("traverse", started);
        Ok(result)
    }

    /// Entities in the bins adjacent to a coordinate.
    ///
    /// # Errors
    ///
    /// [`GraphError::RateLimited`] or KV failures.
    pub async fn nearby(&self, request: &NearbyRequest) -> Result<NearbyResponse, GraphError> {
        let started = self.admit("nearby")?;
        let precision = request.precision.unwrap_or(self.spatial_precision);
        let (lat_bin, lon_bin) = bin_for(request.lat, request.lon, precision);

        let mut entities = HashMap::new();
        for dlat in -request.radius_bins..=request.radius_bins {
            for dlon in -request.radius_bins..=request.radius_bins {
                let key = bin_key(precision, lat_bin + dlat, lon_bin + dlon);
                if let Some(entry) = self.spatial.get(&key).await?
                    && let Ok(bin) = serde_json::from_slice::<SpatialBin>(&entry.value)
                {
                    entities.extend(bin.entities);
                }
            }
        }
        self.observe("nearby", started);
        Ok(NearbyResponse { entities })
    }

    /// Activity in a time window, unioned across hour buckets.
    ///
    /// # Errors
    ///
    /// [`GraphError::RateLimited`] or KV failures.
    pub async fn active_in(&self, request: &TemporalRequest) -> Result<TemporalResponse, GraphError> {
        let started = self.admit("temporal")?;
        let mut events = Vec::new();
        let mut distinct = std::collections::BTreeSet::new();
        for key in hour_keys_between(request.from, request.to) {
            if let Some(entry) = self.temporal.get(&key).await?
                && let Ok(bucket) = serde_json::from_slice::<TemporalBucket>(&entry.value)
            {
                for event in bucket.events {
                    if event.timestamp >= request.from && event.timestamp <= request.to {
                        distinct.insert(event.entity.clone());
                        events.push(event);
                    }
                }
            }
        }
        self.observe("temporal", started);
        Ok(TemporalResponse {
            entity_count: distinct.len() as u64,
            events,
        })
    }

    /// Cosine-ranked similarity search over the embedding index.
    ///
    /// # Errors
    ///
    /// [`GraphError::InvalidQuery`] when the embedding index is disabled;
    /// [`GraphError::RateLimited`] or KV failures otherwise.
    pub async fn semantic(&self, request: &SemanticRequest) -> Result<SemanticResponse, GraphError> {
        let started = self.admit("semantic")?;
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| GraphError::InvalidQuery("embedding index is disabled".into()))?;

        let query_vector = embedder.embed(&request.text).await?;
        let mut hits = Vec::new();
        for key in self.embedding.keys().await? {
            if let Some(entry) = self.embedding.get(&key).await?
                && let Ok(record) = serde_json::from_slice::<EmbeddingRecord>(&entry.value)
            {
                let score = cosine(&query_vector, &record.vector);
                if score >= request.threshold {
                    hits.push(SemanticHit { entity: key, score });
                }
            }
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(request.k);
        self.observe("semantic", started);
        Ok(SemanticResponse { hits })
    }
}
