//! Federated entity identifiers.
//!
//! An [`EntityId`] is a six-segment dotted identifier:
//! `org.platform.domain.system.type.instance`. Every segment is non-empty
//! alphanumeric ASCII. The ID is a pure function of the source record, so
//! independent producers naming the same real-world entity converge on the
//! same key.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Number of dotted segments in a federated entity ID.
pub const SEGMENTS: usize = 6;

/// A validated six-segment entity identifier.
///
/// Entity IDs are pure identifiers — they carry no data of their own. All
/// graph state is keyed by them in the `ENTITY_STATES` bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Parse and validate an entity ID.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidEntityId`] unless the input is exactly
    /// six dot-separated segments of `[A-Za-z0-9]+`.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ModelError> {
        let raw = raw.into();
        let mut count = 0usize;
        for segment in raw.split('.') {
            count += 1;
            if segment.is_empty() {
                return Err(ModelError::InvalidEntityId {
                    id: raw,
                    reason: "empty segment",
                });
            }
            if !segment.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return Err(ModelError::InvalidEntityId {
                    id: raw,
                    reason: "segment contains non-alphanumeric character",
                });
            }
        }
        if count != SEGMENTS {
            return Err(ModelError::InvalidEntityId {
                id: raw,
                reason: "expected exactly six segments",
            });
        }
        Ok(Self(raw))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns an iterator over the six segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Returns the entity type segment (fifth of six).
    #[must_use]
    pub fn entity_type(&self) -> &str {
        self.segments().nth(4).unwrap_or_default()
    }

    /// Returns the instance segment (last).
    #[must_use]
    pub fn instance(&self) -> &str {
        self.segments().nth(5).unwrap_or_default()
    }

    /// Match this ID against a six-segment glob where `*` matches one whole
    /// segment (e.g. `*.*.robotics.*.drone.*`).
    ///
    /// A pattern with the wrong segment count matches nothing.
    #[must_use]
    pub fn matches_glob(&self, pattern: &str) -> bool {
        let pattern_segments: Vec<&str> = pattern.split('.').collect();
        if pattern_segments.len() != SEGMENTS {
            return false;
        }
        self.segments()
            .zip(pattern_segments)
            .all(|(seg, pat)| pat == "*" || pat == seg)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_id() {
        let id = EntityId::parse("acme.plat1.robotics.gcs1.drone.001").unwrap();
        assert_eq!(id.as_str(), "acme.plat1.robotics.gcs1.drone.001");
        assert_eq!(id.entity_type(), "drone");
        assert_eq!(id.instance(), "001");
    }

    #[test]
    fn test_parse_rejects_wrong_segment_count() {
        assert!(EntityId::parse("a.b.c.d.e").is_err());
        assert!(EntityId::parse("a.b.c.d.e.f.g").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_characters() {
        assert!(EntityId::parse("acme.plat-1.robotics.gcs1.drone.001").is_err());
        assert!(EntityId::parse("acme..robotics.gcs1.drone.001").is_err());
        assert!(EntityId::parse("acme.plat1.robotics.gcs1.drone.").is_err());
    }

    #[test]
    fn test_glob_matching() {
        let id = EntityId::parse("acme.plat1.robotics.gcs1.drone.001").unwrap();
        assert!(id.matches_glob("*.*.robotics.*.drone.*"));
        assert!(id.matches_glob("acme.*.*.*.*.*"));
        assert!(!id.matches_glob("*.*.maritime.*.drone.*"));
        assert!(!id.matches_glob("*.*.robotics.*"), "short pattern must not match");
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<EntityId, _> = serde_json::from_str("\"a.b.c.d.e.f\"");
        assert!(ok.is_ok());
        let bad: Result<EntityId, _> = serde_json::from_str("\"not-an-id\"");
        assert!(bad.is_err());
    }
}
