//! Prometheus metrics for the graph processor.
//!
//! All collectors are registered against a caller-supplied registry; tests
//! construct their own and nothing here is global.

use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

/// Counter and histogram families for the graph subsystem.
#[derive(Clone)]
pub struct GraphMetrics {
    /// Messages received on the ingress subjects, by message type.
    pub messages_received: IntCounterVec,
    /// Messages fully processed, by message type.
    pub messages_processed: IntCounterVec,
    /// Messages dropped or failed, by reason.
    pub messages_errors: IntCounterVec,
    /// Messages skipped because the payload was not graphable.
    pub capability_skips: IntCounter,
    /// Messages deduplicated on content hash.
    pub dedup_hits: IntCounter,
    /// End-to-end processing duration per message.
    pub processing_duration: Histogram,
    /// Cache operations: labels `cache` (l1/l2/query) and `op`
    /// (hit/miss/evict).
    pub cache_ops: IntCounterVec,
    /// Index updates applied, by family.
    pub index_updates: IntCounterVec,
    /// Index update failures, by family.
    pub index_failures: IntCounterVec,
    /// Index update latency, by family.
    pub index_latency: HistogramVec,
    /// Queries served, by op.
    pub queries: IntCounterVec,
    /// Query latency, by op.
    pub query_latency: HistogramVec,
    /// Queries rejected by the rate limiter, by op.
    pub queries_rate_limited: IntCounterVec,
    /// Embedding provider fallbacks to the lexical embedder.
    pub embedding_fallbacks: IntCounter,
}

impl GraphMetrics {
    /// Create and register all collectors.
    ///
    /// # Errors
    ///
    /// Returns a [`prometheus::Error`] on duplicate registration.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages_received = IntCounterVec::new(
            Opts::new("graph_messages_received_total", "Messages received on graph ingress"),
            &["type"],
        )?;
        let messages_processed = IntCounterVec::new(
            Opts::new("graph_messages_processed_total", "Messages fully processed"),
            &["type"],
        )?;
        let messages_errors = IntCounterVec::new(
            Opts::new("graph_messages_errors_total", "Messages dropped or failed"),
            &["reason"],
        )?;
        let capability_skips = IntCounter::new(
            "graph_capability_skips_total",
            "Messages skipped because the payload was not graphable",
        )?;
        let dedup_hits = IntCounter::new(
            "graph_dedup_hits_total",
            "Messages deduplicated on content hash",
        )?;
        let processing_duration = Histogram::with_opts(HistogramOpts::new(
            "graph_processing_duration_seconds",
            "End-to-end processing duration per message",
        ))?;
        let cache_ops = IntCounterVec::new(
            Opts::new("graph_cache_ops_total", "Cache hits/misses/evictions"),
            &["cache", "op"],
        )?;
        let index_updates = IntCounterVec::new(
            Opts::new("graph_index_updates_total", "Index updates applied"),
            &["family"],
        )?;
        let index_failures = IntCounterVec::new(
            Opts::new("graph_index_failures_total", "Index update failures"),
            &["family"],
        )?;
        let index_latency = HistogramVec::new(
            HistogramOpts::new("graph_index_latency_seconds", "Index update latency"),
            &["family"],
        )?;
        let queries = IntCounterVec::new(
            Opts::new("graph_queries_total", "Queries served"),
            &["op"],
        )?;
        let query_latency = HistogramVec::new(
            HistogramOpts::new("graph_query_latency_seconds", "Query latency"),
            &["op"],
        )?;
        let queries_rate_limited = IntCounterVec::new(
            Opts::new("graph_queries_rate_limited_total", "Queries rejected by rate limiting"),
            &["op"],
        )?;
        let embedding_fallbacks = IntCounter::new(
            "graph_embedding_fallbacks_total",
            "Embedding provider fallbacks to the lexical embedder",
        )?;

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(messages_processed.clone()))?;
        registry.register(Box::new(messages_errors.clone()))?;
        registry.register(Box::new(capability_skips.clone()))?;
        registry.register(Box::new(dedup_hits.clone()))?;
        registry.register(Box::new(processing_duration.clone()))?;
        registry.register(Box::new(cache_ops.clone()))?;
        registry.register(Box::new(index_updates.clone()))?;
        registry.register(Box::new(index_failures.clone()))?;
        registry.register(Box::new(index_latency.clone()))?;
        registry.register(Box::new(queries.clone()))?;
        registry.register(Box::new(query_latency.clone()))?;
        registry.register(Box::new(queries_rate_limited.clone()))?;
        registry.register(Box::new(embedding_fallbacks.clone()))?;

        Ok(Self {
            messages_received,
            messages_processed,
            messages_errors,
            capability_skips,
            dedup_hits,
            processing_duration,
            cache_ops,
            index_updates,
            index_failures,
            index_latency,
            queries,
            query_latency,
            queries_rate_limited,
            embedding_fallbacks,
        })
    }

    /// A metrics instance on a throwaway registry, for tests and tools.
    ///
    /// # Panics
    ///
    /// Never in practice: registration on a fresh registry cannot collide.
    #[must_use]
    pub fn unregistered() -> Self {
        #[allow(clippy::expect_used)]
        Self::new(&Registry::new()).expect("fresh registry")
    }
}
