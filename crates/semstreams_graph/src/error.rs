//! Graph-processor error types.

use semstreams_bus::BusError;
use semstreams_msg::ModelError;

/// Errors raised on the graph write and read paths.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A bus or KV operation failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// A payload or entity failed validation; the message is dropped and
    /// never retried.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Stored index or state data could not be decoded.
    #[error("corrupt stored value at {key}: {source}")]
    CorruptValue {
        /// KV key.
        key: String,
        /// Decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// JSON encode/decode failure on a request or response envelope.
    #[error("envelope codec error: {0}")]
    Envelope(#[from] serde_json::Error),

    /// The per-op token bucket is empty; retry later.
    #[error("rate limit exceeded for query op {op}")]
    RateLimited {
        /// The limited operation.
        op: &'static str,
    },

    /// The embedding provider failed (before fallback).
    #[error("embedding provider: {0}")]
    Embedding(String),

    /// The ingest queue is full and the message was dropped (core mode).
    #[error("ingest queue full")]
    QueueFull,

    /// A metrics registration failed at startup.
    #[error("metrics registration: {0}")]
    Metrics(#[from] prometheus::Error),

    /// An invalid query parameter.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl GraphError {
    /// Whether the caller may retry (maps to HTTP 429/503 at the gateway).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Bus(e) => e.is_retryable(),
            Self::RateLimited { .. } | Self::QueueFull | Self::Embedding(_) => true,
            _ => false,
        }
    }
}
