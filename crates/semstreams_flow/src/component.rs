//! The component contract and lifecycle states.

use std::sync::Arc;

use async_trait::async_trait;

use semstreams_bus::MessageBus;

use crate::error::FlowError;
use crate::ports::PortBinding;

/// What a component does in the flow; drives start/stop ordering.
///
/// Start order is storage → processors → outputs → inputs, so nothing
/// produces before its consumers are wired. Stop order is the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComponentKind {
    /// Owns durable state (graph processor, rules engine).
    Storage,
    /// Transforms messages in flight.
    Processor,
    /// Pushes messages out of the flow (federation, logger, gateway).
    Output,
    /// Brings messages into the flow (UDP, WebSocket listeners).
    Input,
}

/// Lifecycle state of a managed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Not running.
    Stopped,
    /// `start` in progress.
    Starting,
    /// Accepting work.
    Running,
    /// `stop` in progress; finishing in-flight work.
    Draining,
    /// Terminally failed; peers keep running.
    Failed,
}

/// Health classification surfaced by a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Fully operational.
    Ok,
    /// Operating with reduced capability (e.g. provider fallback active).
    Degraded,
    /// Not operating.
    Failed,
}

/// Health with a free-text reason.
#[derive(Debug, Clone)]
pub struct Health {
    /// Classification.
    pub status: HealthStatus,
    /// Why, when not `Ok`.
    pub reason: Option<String>,
}

impl Health {
    /// Healthy.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: HealthStatus::Ok,
            reason: None,
        }
    }

    /// Degraded with a reason.
    #[must_use]
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            reason: Some(reason.into()),
        }
    }

    /// Failed with a reason.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Failed,
            reason: Some(reason.into()),
        }
    }
}

/// Everything a component needs to run: the bus and its resolved ports.
#[derive(Clone)]
pub struct ComponentContext {
    /// Shared bus handle.
    pub bus: Arc<dyn MessageBus>,
    /// Resolved input bindings.
    pub inputs: Vec<PortBinding>,
    /// Resolved output bindings.
    pub outputs: Vec<PortBinding>,
}

impl ComponentContext {
    /// Find an input binding by port name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&PortBinding> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Find an output binding by port name.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&PortBinding> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

/// A unit of flow with typed ports bound to bus subjects.
///
/// `start` must return promptly, leaving long-running work on owned tasks.
/// `stop` drains those tasks; the runtime enforces a drain deadline and
/// forcibly abandons components that exceed it.
#[async_trait]
pub trait Component: Send + Sync {
    /// Instance name (unique in the flow).
    fn name(&self) -> &str;

    /// Ordering kind.
    fn kind(&self) -> ComponentKind;

    /// Bind ports and launch background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError`] if binding fails. For input components this is
    /// fatal to the whole flow.
    async fn start(&mut self, ctx: ComponentContext) -> Result<(), FlowError>;

    /// Drain and stop background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError`] if shutdown did not complete cleanly.
    async fn stop(&mut self) -> Result<(), FlowError>;

    /// Current health.
    fn health(&self) -> Health {
        Health::ok()
    }
}
