//! The message envelope — the unit of transport.
//!
//! `id` and `hash` are stable for the message's lifetime. The hash covers
//! type + payload (not meta), so a redelivered or re-serialised message keeps
//! its identity and consumers can deduplicate on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Message type: `{domain, category, version}`.
///
/// The derived bus subject is `domain.category.version` unless the publishing
/// port overrides it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageType {
    /// Top-level domain, e.g. `"events"`.
    pub domain: String,
    /// Category within the domain, e.g. `"graph"`.
    pub category: String,
    /// Schema version, e.g. `"v1"`.
    pub version: String,
}

impl MessageType {
    /// Build a message type.
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        category: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            category: category.into(),
            version: version.into(),
        }
    }

    /// The default subject for this type: `domain.category.version`.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("{}.{}.{}", self.domain, self.category, self.version)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.domain, self.category, self.version)
    }
}

/// Transport metadata. Mutable in transit (trace IDs may be attached);
/// excluded from the content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMeta {
    /// When the envelope was created.
    pub created_at: DateTime<Utc>,
    /// Name of the component that published the message.
    pub source: String,
    /// Distributed-tracing trace ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Correlation ID linking related messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// The unit of transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique, immutable message ID.
    pub id: Uuid,
    /// Message type.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Opaque, schema-typed payload.
    pub payload: serde_json::Value,
    /// Transport metadata.
    pub meta: MessageMeta,
    /// Content hash over type + payload, used for dedup.
    pub hash: String,
}

impl Message {
    /// Build a message, computing its content hash.
    #[must_use]
    pub fn new(
        message_type: MessageType,
        payload: serde_json::Value,
        source: impl Into<String>,
    ) -> Self {
        let hash = content_hash(&message_type, &payload);
        Self {
            id: Uuid::new_v4(),
            message_type,
            payload,
            meta: MessageMeta {
                created_at: Utc::now(),
                source: source.into(),
                trace_id: None,
                correlation_id: None,
            },
            hash,
        }
    }

    /// The subject this message is published on by default.
    #[must_use]
    pub fn subject(&self) -> String {
        self.message_type.subject()
    }

    /// Attach a correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.meta.correlation_id = Some(correlation_id.into());
        self
    }

    /// Recompute the content hash and compare against the stored one.
    #[must_use]
    pub fn hash_is_valid(&self) -> bool {
        content_hash(&self.message_type, &self.payload) == self.hash
    }
}

/// Compute the canonical content hash over type + payload.
///
/// SHA-256 over `domain|category|version|` followed by the canonical JSON of
/// the payload (object keys sorted recursively), hex-encoded. Stable across
/// re-serialisation, so redelivered messages hash identically.
#[must_use]
pub fn content_hash(message_type: &MessageType, payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message_type.domain.as_bytes());
    hasher.update(b"|");
    hasher.update(message_type.category.as_bytes());
    hasher.update(b"|");
    hasher.update(message_type.version.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_json(payload).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Render JSON with object keys sorted recursively.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_type() -> MessageType {
        MessageType::new("events", "graph", "v1")
    }

    #[test]
    fn test_subject_derivation() {
        assert_eq!(graph_type().subject(), "events.graph.v1");
    }

    #[test]
    fn test_hash_stable_under_key_order() {
        let a = serde_json::json!({"alpha": 1, "beta": {"x": true, "y": 2}});
        let b: serde_json::Value =
            serde_json::from_str(r#"{"beta": {"y": 2, "x": true}, "alpha": 1}"#).unwrap();
        assert_eq!(content_hash(&graph_type(), &a), content_hash(&graph_type(), &b));
    }

    #[test]
    fn test_hash_differs_by_type() {
        let payload = serde_json::json!({"a": 1});
        let other = MessageType::new("events", "graph", "v2");
        assert_ne!(
            content_hash(&graph_type(), &payload),
            content_hash(&other, &payload)
        );
    }

    #[test]
    fn test_serde_roundtrip_preserves_identity() {
        let msg = Message::new(graph_type(), serde_json::json!({"k": "v"}), "test");
        let json = serde_json::to_string(&msg).unwrap();
        let restored: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, msg.id);
        assert_eq!(restored.hash, msg.hash);
        assert!(restored.hash_is_valid());
    }

    #[test]
    fn test_same_content_same_hash_distinct_ids() {
        let a = Message::new(graph_type(), serde_json::json!({"k": "v"}), "test");
        let b = Message::new(graph_type(), serde_json::json!({"k": "v"}), "test");
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.id, b.id);
    }
}
