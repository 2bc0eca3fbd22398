//! Predicate vocabulary registry.
//!
//! The vocabulary enumerates known predicates with kind/type/unit/range
//! metadata and an optional IRI mapping. It is initialised once at startup,
//! frozen after all components have registered their predicates, and any
//! later additions go through a read-copy-update snapshot swap so readers
//! never block.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Well-known predicate names and prefixes.
pub mod names {
    /// Prefix for relationship predicates (`graph.rel.belongs_to`, …).
    pub const REL_PREFIX: &str = "graph.rel.";
    /// Prefix for alias predicates (`identifier.callsign`, …).
    pub const ALIAS_PREFIX: &str = "identifier.";
    /// Latitude in degrees.
    pub const LATITUDE: &str = "location.latitude";
    /// Longitude in degrees.
    pub const LONGITUDE: &str = "location.longitude";
    /// Altitude in metres.
    pub const ALTITUDE: &str = "location.altitude";
}

/// How a predicate behaves during merge and indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateKind {
    /// Single-valued property; a newer assertion replaces the older one.
    Attribute,
    /// Multi-valued entity reference; becomes an edge.
    Relationship,
    /// Multi-valued name; feeds the alias index.
    Alias,
}

/// Metadata for one known predicate.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Predicate {
    /// Dotted predicate name.
    pub name: String,
    /// Merge/index behaviour.
    pub kind: PredicateKind,
    /// Expected value datatype, e.g. `"number"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    /// Unit of measure for numeric predicates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Valid numeric range, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<(f64, f64)>,
    /// Optional IRI mapping for RDF interoperability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iri: Option<String>,
}

impl Predicate {
    /// Build a predicate entry with just a name and kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PredicateKind) -> Self {
        Self {
            name: name.into(),
            kind,
            datatype: None,
            unit: None,
            range: None,
            iri: None,
        }
    }

    /// Attach a unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Attach a valid range.
    #[must_use]
    pub fn with_range(mut self, lo: f64, hi: f64) -> Self {
        self.range = Some((lo, hi));
        self
    }
}

/// An immutable vocabulary snapshot.
///
/// Unregistered predicates are still legal: their kind is inferred from the
/// well-known prefixes, defaulting to [`PredicateKind::Attribute`].
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    predicates: HashMap<String, Predicate>,
}

impl Vocabulary {
    /// Build a vocabulary from a list of predicates.
    #[must_use]
    pub fn from_predicates(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self {
            predicates: predicates
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
        }
    }

    /// Look up a registered predicate.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Predicate> {
        self.predicates.get(name)
    }

    /// The effective kind of a predicate, registered or inferred.
    #[must_use]
    pub fn kind_of(&self, name: &str) -> PredicateKind {
        if let Some(p) = self.predicates.get(name) {
            return p.kind;
        }
        if name.starts_with(names::REL_PREFIX) {
            PredicateKind::Relationship
        } else if name.starts_with(names::ALIAS_PREFIX) {
            PredicateKind::Alias
        } else {
            PredicateKind::Attribute
        }
    }

    /// Returns `true` if the predicate names an alias.
    #[must_use]
    pub fn is_alias(&self, name: &str) -> bool {
        self.kind_of(name) == PredicateKind::Alias
    }

    /// Returns `true` if the predicate names a relationship.
    #[must_use]
    pub fn is_relationship(&self, name: &str) -> bool {
        self.kind_of(name) == PredicateKind::Relationship
    }

    /// Number of registered predicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Returns `true` if no predicates are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// Process-wide vocabulary with read-copy-update semantics.
///
/// Readers take a cheap [`snapshot`](Self::snapshot); writers clone the
/// current snapshot, extend it, and swap the `Arc`. Tests construct their own
/// registry — nothing here is a global singleton.
#[derive(Debug)]
pub struct VocabularyRegistry {
    inner: RwLock<Arc<Vocabulary>>,
}

impl VocabularyRegistry {
    /// Create a registry with the given initial vocabulary.
    #[must_use]
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self {
            inner: RwLock::new(Arc::new(vocabulary)),
        }
    }

    /// Create a registry seeded with the default SemStreams predicates.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(default_vocabulary())
    }

    /// Current snapshot. Cheap; hold it for the duration of one operation.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vocabulary> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            // A poisoned lock still holds a valid snapshot.
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Register additional predicates, replacing the snapshot.
    pub fn extend(&self, predicates: impl IntoIterator<Item = Predicate>) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = (**guard).clone();
        for p in predicates {
            next.predicates.insert(p.name.clone(), p);
        }
        *guard = Arc::new(next);
    }
}

impl Default for VocabularyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// The seed vocabulary shipped with the runtime.
#[must_use]
pub fn default_vocabulary() -> Vocabulary {
    Vocabulary::from_predicates([
        Predicate::new("graph.rel.belongs_to", PredicateKind::Relationship),
        Predicate::new("graph.rel.alert_for", PredicateKind::Relationship),
        Predicate::new("graph.rel.located_at", PredicateKind::Relationship),
        Predicate::new("identifier.callsign", PredicateKind::Alias),
        Predicate::new("identifier.tail_number", PredicateKind::Alias),
        Predicate::new("identifier.name", PredicateKind::Alias),
        Predicate::new(names::LATITUDE, PredicateKind::Attribute)
            .with_unit("degrees")
            .with_range(-90.0, 90.0),
        Predicate::new(names::LONGITUDE, PredicateKind::Attribute)
            .with_unit("degrees")
            .with_range(-180.0, 180.0),
        Predicate::new(names::ALTITUDE, PredicateKind::Attribute).with_unit("metres"),
        Predicate::new("robotics.battery.level", PredicateKind::Attribute)
            .with_unit("percent")
            .with_range(0.0, 100.0),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_kind() {
        let vocab = default_vocabulary();
        assert_eq!(vocab.kind_of("identifier.callsign"), PredicateKind::Alias);
        assert_eq!(
            vocab.kind_of("graph.rel.belongs_to"),
            PredicateKind::Relationship
        );
        assert_eq!(
            vocab.kind_of("robotics.battery.level"),
            PredicateKind::Attribute
        );
    }

    #[test]
    fn test_inferred_kind_from_prefix() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.kind_of("graph.rel.towed_by"), PredicateKind::Relationship);
        assert_eq!(vocab.kind_of("identifier.mmsi"), PredicateKind::Alias);
        assert_eq!(vocab.kind_of("weather.wind.speed"), PredicateKind::Attribute);
    }

    #[test]
    fn test_registry_rcu_extension() {
        let registry = VocabularyRegistry::with_defaults();
        let before = registry.snapshot();
        registry.extend([Predicate::new("maritime.draft", PredicateKind::Attribute)]);
        let after = registry.snapshot();
        assert!(before.get("maritime.draft").is_none(), "old snapshot unchanged");
        assert!(after.get("maritime.draft").is_some());
    }
}
