//! Model-layer error types.

/// Errors raised while constructing or validating model types.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// An entity ID did not match the six-segment federated form.
    #[error("invalid entity id {id:?}: {reason}")]
    InvalidEntityId {
        /// The offending identifier.
        id: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A predicate was empty or contained illegal characters.
    #[error("invalid predicate {0:?}")]
    InvalidPredicate(String),

    /// A payload failed its self-validation.
    #[error("payload validation failed: {0}")]
    Validation(String),

    /// A payload could not be decoded from JSON.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// A triple carried a confidence outside `[0.0, 1.0]`.
    #[error("confidence {0} out of range [0, 1]")]
    ConfidenceOutOfRange(f64),
}
