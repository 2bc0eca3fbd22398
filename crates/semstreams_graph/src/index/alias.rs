//! Alias index: name resolution in both directions.
//!
//! Forward: `alias--<sanitised alias>` → entity ID. Reverse: `entity--<id>`
//! → list of raw alias values. The vocabulary decides which predicates are
//! aliases (`identifier.callsign`, `identifier.tail_number`, …). Aliases
//! removed from the entity are removed from both directions.

use std::collections::BTreeSet;
use std::sync::Arc;

use semstreams_bus::{DEFAULT_CAS_ATTEMPTS, KvStore, update_with_retry};
use semstreams_msg::{Triple, VocabularyRegistry};

use crate::error::GraphError;
use crate::index::{IndexFamily, IndexTask, decode_list, encode_list};
use crate::sanitize::sanitize;

/// Forward key for an alias value.
#[must_use]
pub fn alias_key(value: &str) -> String {
    format!("alias--{}", sanitize(value))
}

/// Reverse key for an entity.
#[must_use]
pub fn entity_key(entity_id: &str) -> String {
    format!("entity--{entity_id}")
}

/// Maintains `ALIAS_INDEX`.
pub struct AliasIndexer {
    kv: Arc<dyn KvStore>,
    vocabulary: Arc<VocabularyRegistry>,
}

impl AliasIndexer {
    /// Wrap the alias bucket.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, vocabulary: Arc<VocabularyRegistry>) -> Self {
        Self { kv, vocabulary }
    }

    fn alias_values(&self, triples: &[Triple]) -> BTreeSet<String> {
        let vocabulary = self.vocabulary.snapshot();
        triples
            .iter()
            .filter(|t| vocabulary.is_alias(&t.predicate))
            .filter_map(|t| t.object.as_text().map(str::to_string))
            .collect()
    }
}

#[async_trait::async_trait]
impl IndexFamily for AliasIndexer {
    fn family(&self) -> &'static str {
        "alias"
    }

    async fn apply(&self, task: &IndexTask) -> Result<(), GraphError> {
        let entity = task.entity_id.as_str();
        let before = self.alias_values(&task.before_triples);
        let after = self.alias_values(&task.after_triples);

        for value in after.difference(&before) {
            // Forward mapping. Last writer wins on alias collisions across
            // entities; the reverse list keeps both sides resolvable.
            self.kv
                .put(&alias_key(value), serde_json::to_vec(&entity)?)
                .await?;

            update_with_retry(
                self.kv.as_ref(),
                &entity_key(entity),
                DEFAULT_CAS_ATTEMPTS,
                |current| {
                    let mut list = decode_list(current);
                    if list.iter().any(|v| v == value) {
                        return Ok(None);
                    }
                    list.push(value.clone());
                    Ok(Some(encode_list(&list)?))
                },
            )
            .await?;
        }

        for value in before.difference(&after) {
            // Only clear the forward key if it still points at this entity.
            if let Some(entry) = self.kv.get(&alias_key(value)).await? {
                let owner: String = serde_json::from_slice(&entry.value).unwrap_or_default();
                if owner == entity {
                    self.kv.delete(&alias_key(value)).await?;
                }
            }

            update_with_retry(
                self.kv.as_ref(),
                &entity_key(entity),
                DEFAULT_CAS_ATTEMPTS,
                |current| {
                    let mut list = decode_list(current);
                    let len = list.len();
                    list.retain(|v| v != value);
                    if list.len() == len {
                        return Ok(None);
                    }
                    Ok(Some(encode_list(&list)?))
                },
            )
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use semstreams_bus::{MemoryBus, MessageBus};
    use semstreams_msg::{EntityId, TripleObject};

    fn drone() -> EntityId {
        EntityId::parse("acme.plat1.robotics.gcs1.drone.001").unwrap()
    }

    fn callsign(value: &str) -> Triple {
        Triple::new(
            drone(),
            "identifier.callsign",
            TripleObject::Text(value.into()),
            "t",
        )
    }

    fn task(before: Vec<Triple>, after: Vec<Triple>) -> IndexTask {
        IndexTask {
            entity_id: drone(),
            entity_type: "drone".into(),
            before_triples: before,
            after_triples: after,
            before_edges: vec![],
            after_edges: vec![],
            position: None,
            observed_at: Utc::now(),
        }
    }

    async fn indexer(bus: &MemoryBus) -> (AliasIndexer, Arc<dyn KvStore>) {
        let kv = bus.kv("ALIAS_INDEX").await.unwrap();
        (
            AliasIndexer::new(Arc::clone(&kv), Arc::new(VocabularyRegistry::with_defaults())),
            kv,
        )
    }

    #[tokio::test]
    async fn test_both_directions_written() {
        let bus = MemoryBus::new();
        let (indexer, kv) = indexer(&bus).await;

        indexer
            .apply(&task(vec![], vec![callsign("ALPHA-1")]))
            .await
            .unwrap();

        let fwd = kv.get("alias--alpha_1").await.unwrap().unwrap();
        let owner: String = serde_json::from_slice(&fwd.value).unwrap();
        assert_eq!(owner, drone().as_str());

        let rev = kv.get(&entity_key(drone().as_str())).await.unwrap().unwrap();
        let aliases: Vec<String> = serde_json::from_slice(&rev.value).unwrap();
        assert_eq!(aliases, vec!["ALPHA-1".to_string()]);
    }

    #[tokio::test]
    async fn test_removed_alias_cleared_both_ways() {
        let bus = MemoryBus::new();
        let (indexer, kv) = indexer(&bus).await;

        indexer
            .apply(&task(vec![], vec![callsign("ALPHA-1")]))
            .await
            .unwrap();
        indexer
            .apply(&task(vec![callsign("ALPHA-1")], vec![]))
            .await
            .unwrap();

        assert!(kv.get("alias--alpha_1").await.unwrap().is_none());
        let rev = kv.get(&entity_key(drone().as_str())).await.unwrap().unwrap();
        let aliases: Vec<String> = serde_json::from_slice(&rev.value).unwrap();
        assert!(aliases.is_empty());
    }

    #[tokio::test]
    async fn test_non_alias_predicates_ignored() {
        let bus = MemoryBus::new();
        let (indexer, kv) = indexer(&bus).await;
        let triple = Triple::new(
            drone(),
            "robotics.battery.level",
            TripleObject::Number(1.0),
            "t",
        );
        indexer.apply(&task(vec![], vec![triple])).await.unwrap();
        assert!(kv.keys().await.unwrap().is_empty());
    }
}
