//! Flow-runtime error types.

use semstreams_bus::BusError;

/// Errors raised by the flow runtime.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration document was not valid JSON.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration was structurally invalid.
    #[error("invalid config: {0}")]
    Config(String),

    /// Two output ports publish to overlapping subjects with incompatible
    /// declared interfaces.
    #[error(
        "conflicting outputs: {first} and {second} overlap on {subject} with different interfaces"
    )]
    ConflictingOutputs {
        /// First port (component.port).
        first: String,
        /// Second port (component.port).
        second: String,
        /// The overlapping subject.
        subject: String,
    },

    /// A `{field}` placeholder could not be resolved against the payload.
    #[error("unresolved template field {field:?} in subject {subject:?}")]
    MissingTemplateField {
        /// The placeholder name.
        field: String,
        /// The subject template.
        subject: String,
    },

    /// An unknown component type was referenced.
    #[error("no factory registered for component type {0:?}")]
    UnknownComponentType(String),

    /// An input component failed to bind at startup — fatal for the flow.
    #[error("input component {component} failed to start: {reason}")]
    InputBindFailed {
        /// Component name.
        component: String,
        /// Underlying failure.
        reason: String,
    },

    /// A bus operation failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// A component-specific failure.
    #[error("component {component}: {reason}")]
    Component {
        /// Component name.
        component: String,
        /// Detail.
        reason: String,
    },
}
