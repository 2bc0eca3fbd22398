//! Bus-layer error types.

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Failed to establish or keep a transport connection.
    #[error("bus connect error: {0}")]
    Connect(String),

    /// Failed to publish a message.
    #[error("publish to {subject} failed: {message}")]
    Publish {
        /// Target subject.
        subject: String,
        /// Transport detail.
        message: String,
    },

    /// Failed to create a subscription.
    #[error("subscribe to {pattern} failed: {message}")]
    Subscribe {
        /// Requested pattern.
        pattern: String,
        /// Transport detail.
        message: String,
    },

    /// A request/reply round trip failed.
    #[error("request on {subject} failed: {message}")]
    Request {
        /// Target subject.
        subject: String,
        /// Transport detail.
        message: String,
    },

    /// A request timed out waiting for a reply.
    #[error("request on {0} timed out")]
    Timeout(String),

    /// A subject or pattern was syntactically invalid.
    #[error("invalid subject {0:?}: {1}")]
    InvalidSubject(String, &'static str),

    /// JSON encode/decode failure.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A KV bucket operation failed.
    #[error("kv bucket {bucket}: {message}")]
    Kv {
        /// Bucket name.
        bucket: String,
        /// Detail.
        message: String,
    },

    /// A compare-and-swap update lost the race; the caller should re-read
    /// and retry.
    #[error("cas conflict on key {key}")]
    CasConflict {
        /// Contended key.
        key: String,
    },

    /// The CAS retry budget was exhausted without applying the transform.
    #[error("cas retry budget exhausted on key {key} after {attempts} attempts")]
    CasExhausted {
        /// Contended key.
        key: String,
        /// Attempts made.
        attempts: u32,
    },

    /// An object-store operation failed.
    #[error("object store {bucket}: {message}")]
    ObjectStore {
        /// Bucket name.
        bucket: String,
        /// Detail.
        message: String,
    },

    /// The bus or subscription has been closed.
    #[error("bus closed")]
    Closed,
}

impl BusError {
    /// Whether the operation may succeed on retry (transient I/O per the
    /// error taxonomy). Validation-class errors are never retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::Publish { .. }
                | Self::Request { .. }
                | Self::Timeout(_)
                | Self::Kv { .. }
                | Self::CasConflict { .. }
                | Self::CasExhausted { .. }
        )
    }
}
