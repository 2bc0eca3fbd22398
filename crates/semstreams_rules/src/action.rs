//! Rule actions: what a matched rule derives.
//!
//! Actions produce ordinary graphable payloads; the engine publishes them
//! on the rules output subjects and they flow through the normal graph
//! processor path like any other ingest.

use std::collections::HashMap;

use semstreams_msg::{EntityId, EntityState, GraphPayload, Triple, TripleObject};

use crate::error::RuleError;
use crate::rule::Rule;

/// Derives zero or more graph payloads from a matched rule.
pub trait RuleAction: Send + Sync {
    /// Produce the derived payloads.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] when the rule's metadata is unusable.
    fn derive(&self, rule: &Rule, state: &EntityState) -> Result<Vec<GraphPayload>, RuleError>;
}

/// Registry of actions keyed by rule type.
pub struct ActionRegistry {
    actions: HashMap<String, Box<dyn RuleAction>>,
}

impl ActionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// The built-in actions: `alert` and `derive_edge`.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("alert", AlertAction);
        registry.register("derive_edge", DeriveEdgeAction);
        registry
    }

    /// Register an action for a rule type.
    pub fn register(&mut self, rule_type: impl Into<String>, action: impl RuleAction + 'static) {
        self.actions.insert(rule_type.into(), Box::new(action));
    }

    /// Look up the action for a rule type.
    ///
    /// # Errors
    ///
    /// [`RuleError::UnknownRuleType`] when nothing is registered.
    pub fn get(&self, rule_type: &str) -> Result<&dyn RuleAction, RuleError> {
        self.actions
            .get(rule_type)
            .map(Box::as_ref)
            .ok_or_else(|| RuleError::UnknownRuleType(rule_type.to_string()))
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn alnum(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_alphanumeric).collect()
}

// ── Alert ───────────────────────────────────────────────────────────────────

/// Derives an alert entity linked to the triggering entity.
///
/// The alert's ID reuses the source's first four segments with type `alert`
/// and a deterministic instance derived from rule and source, so repeated
/// firings converge onto the same alert entity.
pub struct AlertAction;

impl RuleAction for AlertAction {
    fn derive(&self, rule: &Rule, state: &EntityState) -> Result<Vec<GraphPayload>, RuleError> {
        let source = &state.node.id;
        let prefix: Vec<&str> = source.segments().take(4).collect();
        let instance = format!("{}{}", alnum(&rule.id), alnum(source.instance()));
        let alert_id = EntityId::parse(format!("{}.alert.{instance}", prefix.join(".")))
            .map_err(|e| RuleError::InvalidRule {
                rule: rule.id.clone(),
                reason: format!("cannot derive alert entity id: {e}"),
            })?;

        let severity = rule
            .metadata
            .get("severity")
            .and_then(|s| s.as_str())
            .unwrap_or("warning")
            .to_string();

        let source_label = format!("rules:{}", rule.id);
        let triples = vec![
            Triple::new(
                alert_id.clone(),
                "graph.rel.alert_for",
                TripleObject::Entity(source.clone()),
                source_label.clone(),
            ),
            Triple::new(
                alert_id.clone(),
                "alert.rule",
                TripleObject::Text(rule.id.clone()),
                source_label.clone(),
            ),
            Triple::new(
                alert_id.clone(),
                "alert.severity",
                TripleObject::Text(severity),
                source_label,
            ),
        ];
        Ok(vec![GraphPayload::new(alert_id, triples)])
    }
}

// ── Edge derivation ─────────────────────────────────────────────────────────

/// Adds a configured edge from the matched entity.
///
/// Metadata: `{"predicate": "graph.rel.x", "target": "<entity id>"}`.
pub struct DeriveEdgeAction;

impl RuleAction for DeriveEdgeAction {
    fn derive(&self, rule: &Rule, state: &EntityState) -> Result<Vec<GraphPayload>, RuleError> {
        let predicate = rule
            .metadata
            .get("predicate")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuleError::InvalidRule {
                rule: rule.id.clone(),
                reason: "derive_edge requires metadata.predicate".into(),
            })?;
        let target = rule
            .metadata
            .get("target")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuleError::InvalidRule {
                rule: rule.id.clone(),
                reason: "derive_edge requires metadata.target".into(),
            })?;
        let target = EntityId::parse(target).map_err(|e| RuleError::InvalidRule {
            rule: rule.id.clone(),
            reason: format!("bad target entity: {e}"),
        })?;

        let subject = state.node.id.clone();
        let triple = Triple::new(
            subject.clone(),
            predicate,
            TripleObject::Entity(target),
            format!("rules:{}", rule.id),
        );
        Ok(vec![GraphPayload::new(subject, vec![triple])])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drone_state() -> EntityState {
        EntityState::new(
            EntityId::parse("acme.plat1.robotics.gcs1.drone.001").unwrap(),
            "drone",
        )
    }

    fn rule(rule_type: &str, metadata: serde_json::Value) -> Rule {
        serde_json::from_value(serde_json::json!({
            "id": "battery-low",
            "type": rule_type,
            "entity": {"pattern": "*.*.robotics.*.drone.*"},
            "conditions": [],
            "cooldown": "5m",
            "metadata": metadata
        }))
        .unwrap()
    }

    #[test]
    fn test_alert_derives_linked_entity() {
        let payloads = AlertAction
            .derive(&rule("alert", serde_json::json!({"severity": "critical"})), &drone_state())
            .unwrap();
        assert_eq!(payloads.len(), 1);
        let alert = &payloads[0];
        assert_eq!(alert.entity_id.entity_type(), "alert");
        assert!(
            alert
                .triples
                .iter()
                .any(|t| t.predicate == "graph.rel.alert_for"),
            "alert points back at the source entity"
        );
        assert!(
            alert
                .triples
                .iter()
                .any(|t| t.predicate == "alert.severity" && t.object.as_text() == Some("critical"))
        );
    }

    #[test]
    fn test_alert_id_deterministic() {
        let a = AlertAction.derive(&rule("alert", serde_json::json!({})), &drone_state()).unwrap();
        let b = AlertAction.derive(&rule("alert", serde_json::json!({})), &drone_state()).unwrap();
        assert_eq!(a[0].entity_id, b[0].entity_id, "repeat firings converge");
    }

    #[test]
    fn test_derive_edge() {
        let metadata = serde_json::json!({
            "predicate": "graph.rel.grounded_at",
            "target": "acme.plat1.ops.hq.pad.north"
        });
        let payloads = DeriveEdgeAction
            .derive(&rule("derive_edge", metadata), &drone_state())
            .unwrap();
        assert_eq!(payloads[0].triples.len(), 1);
        assert_eq!(payloads[0].triples[0].predicate, "graph.rel.grounded_at");
    }

    #[test]
    fn test_derive_edge_missing_metadata() {
        let result = DeriveEdgeAction.derive(&rule("derive_edge", serde_json::json!({})), &drone_state());
        assert!(result.is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ActionRegistry::with_defaults();
        assert!(registry.get("alert").is_ok());
        assert!(registry.get("unknown").is_err());
    }
}
