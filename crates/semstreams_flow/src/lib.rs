//! # semstreams_flow — the flow runtime
//!
//! Parses a declarative flow configuration, instantiates components, binds
//! their ports to bus subjects, starts them in dependency order (inputs
//! last) and shuts them down in reverse, each under a drain deadline.
//!
//! Components own their ports and background tasks; the runtime owns the
//! components. A failed component never cascades — its subscriptions stop
//! and peers keep running.

pub mod component;
pub mod config;
pub mod error;
pub mod ports;
pub mod runtime;

pub use component::{
    Component, ComponentContext, ComponentKind, ComponentState, Health, HealthStatus,
};
pub use config::{ComponentSpec, FlowConfig, NatsSettings, PlatformConfig, PortSpec, PortType};
pub use error::FlowError;
pub use ports::{PortBinding, resolve_subject};
pub use runtime::{ComponentFactories, FlowRuntime};
