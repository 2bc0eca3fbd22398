//! The flow runtime — builds, supervises and tears down components.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{error, info, warn};

use semstreams_bus::{MessageBus, subject};

use crate::component::{Component, ComponentContext, ComponentKind, ComponentState, Health};
use crate::config::{ComponentSpec, FlowConfig, PortType};
use crate::error::FlowError;
use crate::ports::{PortBinding, is_template};

/// Builds a component from its name and spec.
pub type FactoryFn =
    Box<dyn Fn(&str, &ComponentSpec) -> Result<Box<dyn Component>, FlowError> + Send + Sync>;

/// Registry of component factories keyed by component type.
#[derive(Default)]
pub struct ComponentFactories {
    factories: HashMap<String, FactoryFn>,
}

impl ComponentFactories {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a component type.
    pub fn register(
        &mut self,
        component_type: impl Into<String>,
        factory: impl Fn(&str, &ComponentSpec) -> Result<Box<dyn Component>, FlowError>
        + Send
        + Sync
        + 'static,
    ) {
        self.factories
            .insert(component_type.into(), Box::new(factory));
    }

    fn build(
        &self,
        component_type: &str,
        name: &str,
        spec: &ComponentSpec,
    ) -> Result<Box<dyn Component>, FlowError> {
        let factory = self
            .factories
            .get(component_type)
            .ok_or_else(|| FlowError::UnknownComponentType(component_type.to_string()))?;
        factory(name, spec)
    }
}

struct Managed {
    name: String,
    kind: ComponentKind,
    component: Box<dyn Component>,
    ctx: ComponentContext,
}

/// The component lifecycle manager.
///
/// Owns every component in the flow. Start order is storage → processors →
/// outputs → inputs; stop order is the reverse, each stop bounded by the
/// drain deadline.
pub struct FlowRuntime {
    components: Vec<Managed>,
    states: Arc<DashMap<String, ComponentState>>,
    drain_deadline: Duration,
}

impl std::fmt::Debug for FlowRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRuntime")
            .field("components", &self.components.len())
            .field("drain_deadline", &self.drain_deadline)
            .finish()
    }
}

impl FlowRuntime {
    /// Default per-component drain deadline.
    pub const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(10);

    /// Instantiate all enabled components and validate port wiring.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::ConflictingOutputs`] when two output ports
    /// publish overlapping subjects with incompatible interfaces, or any
    /// factory/config error.
    pub fn build(
        config: &FlowConfig,
        bus: Arc<dyn MessageBus>,
        factories: &ComponentFactories,
    ) -> Result<Self, FlowError> {
        let mut components = Vec::new();
        let states = Arc::new(DashMap::new());

        for (name, spec) in &config.components {
            if !spec.enabled {
                info!(component = name, "component disabled, skipping");
                continue;
            }
            let component = factories.build(&spec.component_type, name, spec)?;
            let ports = spec.ports()?;
            let ctx = ComponentContext {
                bus: Arc::clone(&bus),
                inputs: ports.inputs.iter().map(PortBinding::from).collect(),
                outputs: ports.outputs.iter().map(PortBinding::from).collect(),
            };
            states.insert(name.clone(), ComponentState::Stopped);
            components.push(Managed {
                name: name.clone(),
                kind: component.kind(),
                component,
                ctx,
            });
        }

        Self::validate_wiring(&components)?;

        Ok(Self {
            components,
            states,
            drain_deadline: Self::DEFAULT_DRAIN_DEADLINE,
        })
    }

    /// Override the per-component drain deadline.
    #[must_use]
    pub fn with_drain_deadline(mut self, deadline: Duration) -> Self {
        self.drain_deadline = deadline;
        self
    }

    /// Refuse to start on conflicting outputs; warn on unmatched ones.
    fn validate_wiring(components: &[Managed]) -> Result<(), FlowError> {
        // (component, port, subject, interface) for every concrete output.
        let outputs: Vec<(&str, &PortBinding)> = components
            .iter()
            .flat_map(|m| m.ctx.outputs.iter().map(move |p| (m.name.as_str(), p)))
            .filter(|(_, p)| p.port_type == PortType::Nats && !is_template(&p.subject))
            .collect();

        for (i, (first_component, first)) in outputs.iter().enumerate() {
            for (second_component, second) in &outputs[i + 1..] {
                if subject::overlaps(&first.subject, &second.subject)
                    && let (Some(a), Some(b)) = (&first.interface, &second.interface)
                    && a != b
                {
                    return Err(FlowError::ConflictingOutputs {
                        first: format!("{first_component}.{}", first.name),
                        second: format!("{second_component}.{}", second.name),
                        subject: first.subject.clone(),
                    });
                }
            }
        }

        let input_patterns: Vec<&str> = components
            .iter()
            .flat_map(|m| m.ctx.inputs.iter())
            .filter(|p| p.port_type == PortType::Nats)
            .map(|p| p.subject.as_str())
            .collect();

        for (component, port) in &outputs {
            let matched = input_patterns
                .iter()
                .any(|pattern| subject::matches(pattern, &port.subject));
            if !matched {
                warn!(
                    component,
                    port = port.name,
                    subject = port.subject,
                    "output has no matching subscriber in this flow"
                );
            }
        }

        Ok(())
    }

    /// Start all components in dependency order.
    ///
    /// A failed input aborts the flow; a failed non-input is marked
    /// [`ComponentState::Failed`] and its peers continue.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::InputBindFailed`] on input bind failure.
    pub async fn start(&mut self) -> Result<(), FlowError> {
        self.components.sort_by_key(|m| m.kind);

        for managed in &mut self.components {
            self.states
                .insert(managed.name.clone(), ComponentState::Starting);
            info!(component = managed.name, kind = ?managed.kind, "starting component");

            match managed.component.start(managed.ctx.clone()).await {
                Ok(()) => {
                    self.states
                        .insert(managed.name.clone(), ComponentState::Running);
                }
                Err(e) if managed.kind == ComponentKind::Input => {
                    self.states
                        .insert(managed.name.clone(), ComponentState::Failed);
                    return Err(FlowError::InputBindFailed {
                        component: managed.name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    error!(component = managed.name, error = %e, "component failed to start");
                    self.states
                        .insert(managed.name.clone(), ComponentState::Failed);
                }
            }
        }
        Ok(())
    }

    /// Stop all components in reverse order, each under the drain deadline.
    pub async fn stop(&mut self) {
        for managed in self.components.iter_mut().rev() {
            let current = self
                .states
                .get(&managed.name)
                .map(|s| *s)
                .unwrap_or(ComponentState::Stopped);
            if current != ComponentState::Running {
                continue;
            }
            self.states
                .insert(managed.name.clone(), ComponentState::Draining);
            info!(component = managed.name, "draining component");

            match tokio::time::timeout(self.drain_deadline, managed.component.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(component = managed.name, error = %e, "component stop reported error");
                }
                Err(_) => {
                    warn!(
                        component = managed.name,
                        deadline = ?self.drain_deadline,
                        "drain deadline exceeded, abandoning component"
                    );
                }
            }
            self.states
                .insert(managed.name.clone(), ComponentState::Stopped);
        }
    }

    /// Current lifecycle state of one component.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<ComponentState> {
        self.states.get(name).map(|s| *s)
    }

    /// Health snapshot of every component.
    #[must_use]
    pub fn health(&self) -> Vec<(String, Health)> {
        self.components
            .iter()
            .map(|m| (m.name.clone(), m.component.health()))
            .collect()
    }

    /// Number of managed components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the flow has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use semstreams_bus::MemoryBus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static START_COUNTER: AtomicUsize = AtomicUsize::new(0);

    struct Probe {
        name: String,
        kind: ComponentKind,
        fail_start: bool,
        started_at: Arc<std::sync::Mutex<Option<usize>>>,
    }

    #[async_trait]
    impl Component for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ComponentKind {
            self.kind
        }

        async fn start(&mut self, _ctx: ComponentContext) -> Result<(), FlowError> {
            if self.fail_start {
                return Err(FlowError::Component {
                    component: self.name.clone(),
                    reason: "boom".into(),
                });
            }
            let order = START_COUNTER.fetch_add(1, Ordering::SeqCst);
            *self.started_at.lock().unwrap() = Some(order);
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), FlowError> {
            Ok(())
        }
    }

    fn spec(component_type: &str, ports: serde_json::Value) -> ComponentSpec {
        ComponentSpec {
            component_type: component_type.into(),
            enabled: true,
            config: serde_json::json!({ "ports": ports }),
        }
    }

    fn probe_factories(
        kind_by_type: &[(&'static str, ComponentKind, bool)],
        slots: &HashMap<String, Arc<std::sync::Mutex<Option<usize>>>>,
    ) -> ComponentFactories {
        let mut factories = ComponentFactories::new();
        for (type_name, kind, fail) in kind_by_type {
            let kind = *kind;
            let fail = *fail;
            let slots = slots.clone();
            factories.register(*type_name, move |name, _spec| {
                Ok(Box::new(Probe {
                    name: name.to_string(),
                    kind,
                    fail_start: fail,
                    started_at: slots
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| Arc::new(std::sync::Mutex::new(None))),
                }) as Box<dyn Component>)
            });
        }
        factories
    }

    #[tokio::test]
    async fn test_start_order_inputs_last() {
        let mut config = FlowConfig::default();
        config.components.insert(
            "a-input".into(),
            spec("input", serde_json::json!({"inputs": [], "outputs": []})),
        );
        config.components.insert(
            "b-storage".into(),
            spec("storage", serde_json::json!({"inputs": [], "outputs": []})),
        );

        let slots: HashMap<String, Arc<std::sync::Mutex<Option<usize>>>> = [
            ("a-input".to_string(), Arc::new(std::sync::Mutex::new(None))),
            ("b-storage".to_string(), Arc::new(std::sync::Mutex::new(None))),
        ]
        .into_iter()
        .collect();

        let factories = probe_factories(
            &[
                ("input", ComponentKind::Input, false),
                ("storage", ComponentKind::Storage, false),
            ],
            &slots,
        );

        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
        let mut runtime = FlowRuntime::build(&config, bus, &factories).unwrap();
        runtime.start().await.unwrap();

        let input_order = slots["a-input"].lock().unwrap().unwrap();
        let storage_order = slots["b-storage"].lock().unwrap().unwrap();
        assert!(storage_order < input_order, "storage starts before inputs");
    }

    #[tokio::test]
    async fn test_input_failure_is_fatal() {
        let mut config = FlowConfig::default();
        config.components.insert(
            "udp".into(),
            spec("bad-input", serde_json::json!({"inputs": [], "outputs": []})),
        );
        let factories = probe_factories(&[("bad-input", ComponentKind::Input, true)], &HashMap::new());

        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
        let mut runtime = FlowRuntime::build(&config, bus, &factories).unwrap();
        let err = runtime.start().await.unwrap_err();
        assert!(matches!(err, FlowError::InputBindFailed { .. }));
    }

    #[tokio::test]
    async fn test_processor_failure_is_isolated() {
        let mut config = FlowConfig::default();
        config.components.insert(
            "bad".into(),
            spec("bad-proc", serde_json::json!({"inputs": [], "outputs": []})),
        );
        config.components.insert(
            "good".into(),
            spec("good-proc", serde_json::json!({"inputs": [], "outputs": []})),
        );
        let factories = probe_factories(
            &[
                ("bad-proc", ComponentKind::Processor, true),
                ("good-proc", ComponentKind::Processor, false),
            ],
            &HashMap::new(),
        );

        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
        let mut runtime = FlowRuntime::build(&config, bus, &factories).unwrap();
        runtime.start().await.unwrap();
        assert_eq!(runtime.state("bad"), Some(ComponentState::Failed));
        assert_eq!(runtime.state("good"), Some(ComponentState::Running));
    }

    #[tokio::test]
    async fn test_conflicting_outputs_refused() {
        let mut config = FlowConfig::default();
        config.components.insert(
            "one".into(),
            spec(
                "proc",
                serde_json::json!({
                    "inputs": [],
                    "outputs": [{"name": "out", "subject": "events.x.v1", "type": "nats", "interface": "A"}]
                }),
            ),
        );
        config.components.insert(
            "two".into(),
            spec(
                "proc",
                serde_json::json!({
                    "inputs": [],
                    "outputs": [{"name": "out", "subject": "events.x.v1", "type": "nats", "interface": "B"}]
                }),
            ),
        );
        let factories = probe_factories(&[("proc", ComponentKind::Processor, false)], &HashMap::new());

        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
        let err = FlowRuntime::build(&config, bus, &factories).unwrap_err();
        assert!(matches!(err, FlowError::ConflictingOutputs { .. }));
    }
}
