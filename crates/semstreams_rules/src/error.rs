//! Rules-engine error types.

use semstreams_bus::BusError;

/// Errors raised while loading or running rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// A rule definition was structurally invalid.
    #[error("invalid rule {rule}: {reason}")]
    InvalidRule {
        /// Rule ID.
        rule: String,
        /// What was wrong.
        reason: String,
    },

    /// A rule's regex operator carried an uncompilable pattern.
    #[error("invalid regex in rule {rule}: {source}")]
    InvalidRegex {
        /// Rule ID.
        rule: String,
        /// Compile failure.
        #[source]
        source: regex::Error,
    },

    /// A cooldown or duration string could not be parsed.
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    /// No action is registered for a rule type.
    #[error("no action registered for rule type {0:?}")]
    UnknownRuleType(String),

    /// A bus or KV operation failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// JSON decode failure.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A metrics registration failed.
    #[error("metrics registration: {0}")]
    Metrics(#[from] prometheus::Error),
}
