//! Flow configuration model.
//!
//! A JSON document with `platform`, `nats`, `services` and `components`
//! sections. Precedence, lowest to highest: code defaults → file →
//! `SEMSTREAMS_*` environment variables → live overrides in the `CONFIG`
//! KV bucket. KV-layer overrides are read once at startup; a restart resets
//! them.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use semstreams_bus::KvStore;

use crate::error::FlowError;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SEMSTREAMS_";

/// Identity of this runtime instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Organisation segment used in generated entity IDs.
    pub org: String,
    /// Platform identifier.
    pub id: String,
    /// Platform type label.
    #[serde(rename = "type")]
    pub platform_type: String,
    /// Deployment region.
    pub region: String,
    /// Unique instance identifier.
    pub instance_id: String,
    /// Environment name (`dev`, `staging`, `prod`).
    pub environment: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            org: "semstreams".into(),
            id: "local".into(),
            platform_type: "runtime".into(),
            region: "local".into(),
            instance_id: "instance0".into(),
            environment: "dev".into(),
        }
    }
}

/// Bus connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsSettings {
    /// Server URLs.
    pub urls: Vec<String>,
    /// Optional user.
    pub user: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Whether JetStream (durable streams, KV) is expected.
    pub jetstream: bool,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".into()],
            user: None,
            password: None,
            jetstream: true,
        }
    }
}

/// A named service descriptor (`service-manager`, `metrics`,
/// `message-logger`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSpec {
    /// Whether the service runs.
    pub enabled: bool,
    /// Service-specific configuration.
    pub config: serde_json::Value,
}

/// Transport binding of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortType {
    /// Plain bus subject.
    #[serde(rename = "nats")]
    Nats,
    /// KV bucket watch.
    #[serde(rename = "kv-watch")]
    KvWatch,
}

impl Default for PortType {
    fn default() -> Self {
        Self::Nats
    }
}

/// One input or output port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port name, unique within the component.
    pub name: String,
    /// Subject (outputs may contain `{field}` placeholders; inputs may be
    /// wildcarded).
    pub subject: String,
    /// Transport binding.
    #[serde(rename = "type", default)]
    pub port_type: PortType,
    /// Declared message interface, used for output-conflict detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

/// The ports block every component config carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsSpec {
    /// Input ports.
    pub inputs: Vec<PortSpec>,
    /// Output ports.
    pub outputs: Vec<PortSpec>,
}

/// One component instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Component type, resolved through the factory registry.
    #[serde(rename = "type")]
    pub component_type: String,
    /// Whether the component is instantiated.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Component-specific configuration, including `ports`.
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_true() -> bool {
    true
}

impl ComponentSpec {
    /// The `ports` block of this component's config.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Parse`] when `ports` is present but malformed.
    pub fn ports(&self) -> Result<PortsSpec, FlowError> {
        match self.config.get("ports") {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(PortsSpec::default()),
        }
    }
}

/// The full flow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Instance identity.
    pub platform: PlatformConfig,
    /// Bus settings.
    pub nats: NatsSettings,
    /// Named services.
    pub services: BTreeMap<String, ServiceSpec>,
    /// Component instances by name.
    pub components: BTreeMap<String, ComponentSpec>,
}

impl FlowConfig {
    /// Load a configuration file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Io`] or [`FlowError::Parse`].
    pub fn load(path: &Path) -> Result<Self, FlowError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.apply_env(std::env::vars());
        Ok(config)
    }

    /// Apply `SEMSTREAMS_*` environment overrides from an explicit iterator
    /// (tests pass their own).
    pub fn apply_env(&mut self, vars: impl Iterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(flat) = key.strip_prefix(ENV_PREFIX) {
                self.apply_flat_override(&flat.to_lowercase(), &value);
            }
        }
    }

    /// Apply live overrides from the `CONFIG` KV bucket. Keys use the same
    /// flat snake-case names as the environment layer.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Bus`] if the bucket cannot be read.
    pub async fn apply_kv_overlay(&mut self, kv: &dyn KvStore) -> Result<(), FlowError> {
        for key in kv.keys().await? {
            if let Some(entry) = kv.get(&key).await? {
                let value = String::from_utf8_lossy(&entry.value).to_string();
                self.apply_flat_override(&key, &value);
            }
        }
        Ok(())
    }

    /// Apply one flat snake-case override.
    fn apply_flat_override(&mut self, key: &str, value: &str) {
        debug!(key, "applying config override");
        match key {
            "platform_org" => self.platform.org = value.into(),
            "platform_id" => self.platform.id = value.into(),
            "platform_type" => self.platform.platform_type = value.into(),
            "platform_region" => self.platform.region = value.into(),
            "platform_instance_id" => self.platform.instance_id = value.into(),
            "platform_environment" => self.platform.environment = value.into(),
            "nats_urls" => {
                self.nats.urls = value.split(',').map(|s| s.trim().to_string()).collect();
            }
            "nats_user" => self.nats.user = Some(value.into()),
            "nats_password" => self.nats.password = Some(value.into()),
            "nats_jetstream" => self.nats.jetstream = value == "true" || value == "1",
            other => {
                // component_<name>_enabled toggles one component.
                if let Some(rest) = other.strip_prefix("component_")
                    && let Some(name) = rest.strip_suffix("_enabled")
                {
                    if let Some(spec) = self.components.get_mut(name) {
                        spec.enabled = value == "true" || value == "1";
                    } else {
                        warn!(component = name, "override for unknown component");
                    }
                } else {
                    warn!(key = other, "unknown config override key");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "platform": {"org": "acme", "id": "plat1"},
        "nats": {"urls": ["nats://10.0.0.1:4222"]},
        "services": {"metrics": {"enabled": true, "config": {}}},
        "components": {
            "graph": {
                "type": "graph-processor",
                "config": {
                    "ports": {
                        "inputs": [
                            {"name": "events", "subject": "events.graph.entity.*", "type": "nats"}
                        ],
                        "outputs": []
                    }
                }
            }
        }
    }"#;

    #[test]
    fn test_parse_sample() {
        let config: FlowConfig = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.platform.org, "acme");
        assert_eq!(config.platform.region, "local", "defaults fill gaps");
        assert!(config.components["graph"].enabled, "enabled defaults to true");

        let ports = config.components["graph"].ports().unwrap();
        assert_eq!(ports.inputs.len(), 1);
        assert_eq!(ports.inputs[0].subject, "events.graph.entity.*");
        assert_eq!(ports.inputs[0].port_type, PortType::Nats);
    }

    #[test]
    fn test_env_overrides() {
        let mut config: FlowConfig = serde_json::from_str(SAMPLE).unwrap();
        let vars = vec![
            ("SEMSTREAMS_NATS_URLS".to_string(), "nats://a:4222, nats://b:4222".to_string()),
            ("SEMSTREAMS_PLATFORM_ORG".to_string(), "overridden".to_string()),
            ("SEMSTREAMS_COMPONENT_GRAPH_ENABLED".to_string(), "false".to_string()),
            ("UNRELATED".to_string(), "ignored".to_string()),
        ];
        config.apply_env(vars.into_iter());
        assert_eq!(config.nats.urls, vec!["nats://a:4222", "nats://b:4222"]);
        assert_eq!(config.platform.org, "overridden");
        assert!(!config.components["graph"].enabled);
    }

    #[tokio::test]
    async fn test_kv_overlay() {
        let bus = semstreams_bus::MemoryBus::new();
        let kv = semstreams_bus::MessageBus::kv(&bus, "CONFIG").await.unwrap();
        kv.put("platform_region", b"eu-west".to_vec()).await.unwrap();

        let mut config: FlowConfig = serde_json::from_str(SAMPLE).unwrap();
        config.apply_kv_overlay(kv.as_ref()).await.unwrap();
        assert_eq!(config.platform.region, "eu-west");
    }
}
