//! Declarative message filtering for federation.
//!
//! A filter is a map of dotted payload fields to operator objects, e.g.
//! `{"priority": {"gte": 3}, "robotics.battery.level": {"lte": 20}}`. All
//! entries must hold for the message to pass; a missing field fails its
//! entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use semstreams_msg::Message;

/// Operators applicable to one field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOp {
    /// Numeric greater-than-or-equal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
    /// Numeric less-than-or-equal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
    /// Numeric greater-than.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,
    /// Numeric less-than.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
    /// Exact equality on the JSON value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eq: Option<serde_json::Value>,
    /// Exact inequality on the JSON value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ne: Option<serde_json::Value>,
    /// Membership in a value list.
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub is_in: Option<Vec<serde_json::Value>>,
    /// Substring match on string values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
}

impl FilterOp {
    fn check(&self, value: &serde_json::Value) -> bool {
        let number = value.as_f64();
        if let Some(bound) = self.gte
            && !number.is_some_and(|n| n >= bound)
        {
            return false;
        }
        if let Some(bound) = self.lte
            && !number.is_some_and(|n| n <= bound)
        {
            return false;
        }
        if let Some(bound) = self.gt
            && !number.is_some_and(|n| n > bound)
        {
            return false;
        }
        if let Some(bound) = self.lt
            && !number.is_some_and(|n| n < bound)
        {
            return false;
        }
        if let Some(expected) = &self.eq
            && value != expected
        {
            return false;
        }
        if let Some(unexpected) = &self.ne
            && value == unexpected
        {
            return false;
        }
        if let Some(list) = &self.is_in
            && !list.contains(value)
        {
            return false;
        }
        if let Some(needle) = &self.contains
            && !value.as_str().is_some_and(|s| s.contains(needle.as_str()))
        {
            return false;
        }
        true
    }
}

/// The full filter: field → operators. Empty filters pass everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec(pub BTreeMap<String, FilterOp>);

impl FilterSpec {
    /// Whether a message passes the filter.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        self.0.iter().all(|(field, op)| {
            lookup(&message.payload, field).is_some_and(|value| op.check(&value))
        })
    }
}

/// Dotted lookup. For graphable payloads, a field that is not a direct
/// payload key also checks the triples by predicate.
fn lookup(payload: &serde_json::Value, field: &str) -> Option<serde_json::Value> {
    let mut current = payload;
    let mut walked = true;
    for part in field.split('.') {
        match current.get(part) {
            Some(next) => current = next,
            None => {
                walked = false;
                break;
            }
        }
    }
    if walked {
        return Some(current.clone());
    }

    // Fall back to triple predicates on graphable payloads.
    payload
        .get("triples")?
        .as_array()?
        .iter()
        .find(|t| t.get("predicate").and_then(|p| p.as_str()) == Some(field))
        .and_then(|t| t.get("object").cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use semstreams_msg::MessageType;

    fn message(payload: serde_json::Value) -> Message {
        Message::new(MessageType::new("events", "test", "v1"), payload, "test")
    }

    fn spec(json: serde_json::Value) -> FilterSpec {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_numeric_bounds() {
        let filter = spec(serde_json::json!({"priority": {"gte": 3}}));
        assert!(filter.matches(&message(serde_json::json!({"priority": 5}))));
        assert!(!filter.matches(&message(serde_json::json!({"priority": 1}))));
    }

    #[test]
    fn test_missing_field_fails() {
        let filter = spec(serde_json::json!({"priority": {"gte": 3}}));
        assert!(!filter.matches(&message(serde_json::json!({"other": 5}))));
    }

    #[test]
    fn test_combined_fields_all_must_hold() {
        let filter = spec(serde_json::json!({
            "priority": {"gte": 3},
            "kind": {"eq": "alert"}
        }));
        assert!(filter.matches(&message(serde_json::json!({"priority": 4, "kind": "alert"}))));
        assert!(!filter.matches(&message(serde_json::json!({"priority": 4, "kind": "status"}))));
    }

    #[test]
    fn test_triple_predicate_fallback() {
        let filter = spec(serde_json::json!({"robotics.battery.level": {"lte": 20}}));
        let payload = serde_json::json!({
            "entity_id": "acme.plat1.robotics.gcs1.drone.001",
            "triples": [
                {"predicate": "robotics.battery.level", "object": 15.4}
            ]
        });
        assert!(filter.matches(&message(payload)));
    }

    #[test]
    fn test_empty_filter_passes_everything() {
        let filter = FilterSpec::default();
        assert!(filter.matches(&message(serde_json::json!({}))));
    }

    #[test]
    fn test_in_and_contains() {
        let filter = spec(serde_json::json!({"kind": {"in": ["alert", "alarm"]}}));
        assert!(filter.matches(&message(serde_json::json!({"kind": "alarm"}))));
        assert!(!filter.matches(&message(serde_json::json!({"kind": "status"}))));

        let filter = spec(serde_json::json!({"note": {"contains": "urgent"}}));
        assert!(filter.matches(&message(serde_json::json!({"note": "most urgent case"}))));
    }
}
