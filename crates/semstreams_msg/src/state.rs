//! The durable entity record and its merge rules.
//!
//! [`EntityState`] aggregates all triples and edges for one entity and is
//! the value stored in the `ENTITY_STATES` bucket. `version` increases
//! monotonically on every successful write; merge is commutative under write
//! reordering, so concurrent writers converge to the same state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entity::EntityId;
use crate::triple::Triple;
use crate::vocabulary::{PredicateKind, Vocabulary};

/// The identity portion of an entity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityNode {
    /// Federated entity ID.
    pub id: EntityId,
    /// Entity type label (fifth ID segment by convention).
    #[serde(rename = "type")]
    pub entity_type: String,
}

/// One outgoing edge `(predicate, target)` with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Relationship predicate, e.g. `graph.rel.belongs_to`.
    pub predicate: String,
    /// Target entity.
    pub target: EntityId,
    /// Producing source.
    pub source: String,
    /// Observation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl Edge {
    fn key(&self) -> (String, String) {
        (self.predicate.clone(), self.target.as_str().to_string())
    }

    fn wins_over(&self, other: &Edge) -> bool {
        if self.timestamp != other.timestamp {
            return self.timestamp > other.timestamp;
        }
        if self.confidence != other.confidence {
            return self.confidence > other.confidence;
        }
        self.source > other.source
    }
}

/// The result of merging incoming triples into an entity state.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Whether any observable state changed (and the version was bumped).
    pub changed: bool,
    /// Triples before the merge.
    pub before_triples: Vec<Triple>,
    /// Triples after the merge.
    pub after_triples: Vec<Triple>,
    /// Edges before the merge.
    pub before_edges: Vec<Edge>,
    /// Edges after the merge.
    pub after_edges: Vec<Edge>,
}

/// The durable, versioned record for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityState {
    /// Identity.
    pub node: EntityNode,
    /// Outgoing edges.
    pub edges: Vec<Edge>,
    /// All current triples (attributes, relationships, aliases).
    pub triples: Vec<Triple>,
    /// Monotonic write version. `0` means never written.
    pub version: u64,
    /// Time of the last successful merge.
    pub updated_at: DateTime<Utc>,
    /// Source of the last merge.
    pub last_source: String,
}

impl EntityState {
    /// A fresh, never-written state for an entity.
    #[must_use]
    pub fn new(id: EntityId, entity_type: impl Into<String>) -> Self {
        Self {
            node: EntityNode {
                id,
                entity_type: entity_type.into(),
            },
            edges: Vec::new(),
            triples: Vec::new(),
            version: 0,
            updated_at: Utc::now(),
            last_source: String::new(),
        }
    }

    /// Merge incoming triples under the vocabulary's merge rules.
    ///
    /// - Attribute predicates are single-valued: the winning assertion per
    ///   `(subject, predicate)` survives.
    /// - Relationship and alias predicates are multi-valued: assertions are
    ///   deduplicated on `(subject, predicate, object)`, the winning copy's
    ///   provenance survives, and relationships are mirrored into `edges`.
    ///
    /// Winner selection is newest timestamp, then highest confidence, then
    /// lexicographically greatest source — a total order, which makes the
    /// merge commutative under reordering.
    ///
    /// The version is bumped only when observable state changed; re-applying
    /// the same merge is a no-op.
    pub fn merge(&mut self, incoming: Vec<Triple>, vocabulary: &Vocabulary) -> MergeOutcome {
        let before_triples = self.triples.clone();
        let before_edges = self.edges.clone();

        let mut changed = false;
        let mut merge_source = None;

        for triple in incoming {
            if triple.subject != self.node.id {
                continue;
            }
            let kind = vocabulary.kind_of(&triple.predicate);
            let applied = match kind {
                PredicateKind::Attribute => self.apply_single_valued(triple.clone()),
                PredicateKind::Relationship | PredicateKind::Alias => {
                    self.apply_multi_valued(triple.clone())
                }
            };
            if applied {
                changed = true;
                merge_source = Some(triple.source);
            }
        }

        if changed {
            self.rebuild_edges(vocabulary);
            self.version += 1;
            self.updated_at = Utc::now();
            if let Some(source) = merge_source {
                self.last_source = source;
            }
        }

        MergeOutcome {
            changed,
            before_triples,
            after_triples: self.triples.clone(),
            before_edges,
            after_edges: self.edges.clone(),
        }
    }

    /// Replace the existing assertion for `(subject, predicate)` if the
    /// incoming one wins. Returns whether state changed.
    fn apply_single_valued(&mut self, incoming: Triple) -> bool {
        if let Some(existing) = self
            .triples
            .iter_mut()
            .find(|t| t.predicate == incoming.predicate)
        {
            if incoming.wins_over(existing) {
                *existing = incoming;
                true
            } else {
                false
            }
        } else {
            self.triples.push(incoming);
            true
        }
    }

    /// Deduplicate on full identity, keeping the winning copy's provenance.
    /// Returns whether state changed.
    fn apply_multi_valued(&mut self, incoming: Triple) -> bool {
        let identity = incoming.identity();
        if let Some(existing) = self.triples.iter_mut().find(|t| t.identity() == identity) {
            if incoming.wins_over(existing) {
                *existing = incoming;
                true
            } else {
                false
            }
        } else {
            self.triples.push(incoming);
            true
        }
    }

    /// Recompute `edges` from the relationship triples.
    fn rebuild_edges(&mut self, vocabulary: &Vocabulary) {
        let mut edges: HashMap<(String, String), Edge> = HashMap::new();
        for triple in &self.triples {
            if !vocabulary.is_relationship(&triple.predicate) {
                continue;
            }
            let Some(target) = triple.object.as_entity() else {
                continue;
            };
            let edge = Edge {
                predicate: triple.predicate.clone(),
                target: target.clone(),
                source: triple.source.clone(),
                timestamp: triple.timestamp,
                confidence: triple.confidence,
            };
            edges
                .entry(edge.key())
                .and_modify(|existing| {
                    if edge.wins_over(existing) {
                        *existing = edge.clone();
                    }
                })
                .or_insert(edge);
        }
        let mut list: Vec<Edge> = edges.into_values().collect();
        list.sort_by(|a, b| a.key().cmp(&b.key()));
        self.edges = list;
    }

    /// The current value triple for a predicate, if any. For multi-valued
    /// predicates this is the most recent assertion.
    #[must_use]
    pub fn current(&self, predicate: &str) -> Option<&Triple> {
        self.triples
            .iter()
            .filter(|t| t.predicate == predicate)
            .max_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then(a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
            })
    }

    /// All alias values currently asserted on this entity.
    #[must_use]
    pub fn aliases(&self, vocabulary: &Vocabulary) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .triples
            .iter()
            .filter(|t| vocabulary.is_alias(&t.predicate))
            .filter_map(|t| t.object.as_text().map(str::to_string))
            .collect();
        aliases.sort();
        aliases.dedup();
        aliases
    }
}
