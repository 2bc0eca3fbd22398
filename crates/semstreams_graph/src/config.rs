//! Graph processor configuration.

use serde::{Deserialize, Serialize};

/// Embedding indexer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Whether the embedding index is maintained at all.
    pub enabled: bool,
    /// Provider kind: `"lexical"` (built-in) or `"http"` (OpenAI-style
    /// endpoint with automatic lexical fallback).
    pub provider: String,
    /// HTTP provider endpoint, e.g. `http://localhost:8091/v1/embeddings`.
    pub endpoint: Option<String>,
    /// Model name reported to the provider and stored with vectors.
    pub model: String,
    /// Vector dimension; the lexical fallback projects to the same size so
    /// vectors stay comparable within one index.
    pub dimension: usize,
    /// Triple fields mined for embeddable text, in priority order.
    pub fields: Vec<String>,
    /// Provider request deadline in milliseconds.
    pub timeout_ms: u64,
    /// Saturation parameter of the lexical fallback's term weighting.
    pub saturation: f32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "lexical".into(),
            endpoint: None,
            model: "semembed-default".into(),
            dimension: 384,
            fields: ["title", "description", "content", "summary", "text", "name"]
                .into_iter()
                .map(String::from)
                .collect(),
            timeout_ms: 2_000,
            saturation: 1.5,
        }
    }
}

/// Graph processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Ingress subjects. One convention per deployment:
    /// `events.graph.entity.*` or `storage.*.events`.
    pub subscribe_subjects: Vec<String>,
    /// Worker pool size.
    pub workers: usize,
    /// Bounded ingest queue length.
    pub queue_capacity: usize,
    /// Write-coalescing window in milliseconds.
    pub coalesce_window_ms: u64,
    /// L1 cache capacity (entries).
    pub l1_capacity: usize,
    /// L2 cache TTL in seconds.
    pub l2_ttl_secs: u64,
    /// L2 cache capacity (entries).
    pub l2_capacity: usize,
    /// Spatial index precision level, 4–8.
    pub spatial_precision: u8,
    /// Recent-hash dedup window (messages).
    pub dedup_capacity: usize,
    /// Embedding indexer settings.
    pub embedding: EmbeddingConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            subscribe_subjects: vec!["events.graph.entity.*".into()],
            workers: 10,
            queue_capacity: 10_000,
            coalesce_window_ms: 10,
            l1_capacity: 1_024,
            l2_ttl_secs: 30,
            l2_capacity: 16_384,
            spatial_precision: 7,
            dedup_capacity: 8_192,
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl GraphConfig {
    /// Parse from a component's JSON `config` block, filling defaults.
    ///
    /// # Errors
    ///
    /// Returns a decode error when present fields have the wrong shape.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
    }
}
