//! Embedding index: semantic vectors per entity.
//!
//! Text is mined from a configured list of triple fields, hashed, and
//! deduplicated through `EMBEDDING_DEDUP` so identical content is embedded
//! once. Provider fallback is handled inside the embedder and is never
//! fatal; entities with no text are skipped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use semstreams_bus::KvStore;
use semstreams_msg::Triple;

use crate::embed::EmbeddingProvider;
use crate::error::GraphError;
use crate::index::{IndexFamily, IndexTask};

/// The value stored per entity in `EMBEDDING_INDEX`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// The dense vector.
    pub vector: Vec<f32>,
    /// Model that produced it.
    pub model: String,
    /// Hash of the embedded text, for change detection.
    pub text_hash: String,
    /// When the vector was computed.
    pub created_at: DateTime<Utc>,
}

/// Mine embeddable text from triples: for each configured field, values of
/// predicates named `field` or ending in `.field`, joined in field order.
#[must_use]
pub fn extract_text(triples: &[Triple], fields: &[String]) -> String {
    let mut parts = Vec::new();
    for field in fields {
        let suffix = format!(".{field}");
        for triple in triples {
            if (triple.predicate == *field || triple.predicate.ends_with(&suffix))
                && let Some(text) = triple.object.as_text()
                && !text.is_empty()
            {
                parts.push(text.to_string());
            }
        }
    }
    parts.join("\n")
}

fn text_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Maintains `EMBEDDING_INDEX` and `EMBEDDING_DEDUP`.
pub struct EmbeddingIndexer {
    index: Arc<dyn KvStore>,
    dedup: Arc<dyn KvStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    fields: Vec<String>,
}

impl EmbeddingIndexer {
    /// Wrap the embedding buckets.
    #[must_use]
    pub fn new(
        index: Arc<dyn KvStore>,
        dedup: Arc<dyn KvStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        fields: Vec<String>,
    ) -> Self {
        Self {
            index,
            dedup,
            embedder,
            fields,
        }
    }

    async fn existing_record(&self, entity: &str) -> Option<EmbeddingRecord> {
        let entry = self.index.get(entity).await.ok()??;
        serde_json::from_slice(&entry.value).ok()
    }
}

#[async_trait::async_trait]
impl IndexFamily for EmbeddingIndexer {
    fn family(&self) -> &'static str {
        "embedding"
    }

    async fn apply(&self, task: &IndexTask) -> Result<(), GraphError> {
        let text = extract_text(&task.after_triples, &self.fields);
        if text.is_empty() {
            return Ok(());
        }
        let entity = task.entity_id.as_str();
        let hash = text_hash(&text);

        // Unchanged text: nothing to do.
        if let Some(existing) = self.existing_record(entity).await
            && existing.text_hash == hash
        {
            return Ok(());
        }

        // Identical content seen on another entity: reuse its vector.
        if let Some(dedup_entry) = self.dedup.get(&hash).await? {
            let owner: String = serde_json::from_slice(&dedup_entry.value).unwrap_or_default();
            if let Some(record) = self.existing_record(&owner).await {
                debug!(entity, owner, "reusing embedding via dedup");
                self.index.put(entity, serde_json::to_vec(&record)?).await?;
                return Ok(());
            }
        }

        let vector = self.embedder.embed(&text).await?;
        let record = EmbeddingRecord {
            vector,
            model: self.embedder.model().to_string(),
            text_hash: hash.clone(),
            created_at: Utc::now(),
        };
        self.index.put(entity, serde_json::to_vec(&record)?).await?;
        self.dedup.put(&hash, serde_json::to_vec(&entity)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::LexicalEmbedder;
    use semstreams_bus::{MemoryBus, MessageBus};
    use semstreams_msg::{EntityId, TripleObject};

    fn drone(n: u32) -> EntityId {
        EntityId::parse(format!("acme.plat1.robotics.gcs1.drone.{n:03}")).unwrap()
    }

    fn titled_task(id: EntityId, title: &str) -> IndexTask {
        let triple = Triple::new(id.clone(), "title", TripleObject::Text(title.into()), "t");
        IndexTask {
            entity_id: id,
            entity_type: "drone".into(),
            before_triples: vec![],
            after_triples: vec![triple],
            before_edges: vec![],
            after_edges: vec![],
            position: None,
            observed_at: Utc::now(),
        }
    }

    fn fields() -> Vec<String> {
        vec!["title".into(), "description".into()]
    }

    async fn indexer(bus: &MemoryBus) -> (EmbeddingIndexer, Arc<dyn KvStore>, Arc<dyn KvStore>) {
        let index = bus.kv("EMBEDDING_INDEX").await.unwrap();
        let dedup = bus.kv("EMBEDDING_DEDUP").await.unwrap();
        (
            EmbeddingIndexer::new(
                Arc::clone(&index),
                Arc::clone(&dedup),
                Arc::new(LexicalEmbedder::new(64, 1.5)),
                fields(),
            ),
            index,
            dedup,
        )
    }

    #[test]
    fn test_extract_text_field_matching() {
        let id = drone(1);
        let triples = vec![
            Triple::new(id.clone(), "doc.title", TripleObject::Text("Rescue drone".into()), "t"),
            Triple::new(id.clone(), "robotics.battery.level", TripleObject::Number(50.0), "t"),
            Triple::new(id, "description", TripleObject::Text("Over the bay".into()), "t"),
        ];
        let text = extract_text(&triples, &fields());
        assert_eq!(text, "Rescue drone\nOver the bay");
    }

    #[tokio::test]
    async fn test_entity_without_text_skipped() {
        let bus = MemoryBus::new();
        let (indexer, index, _) = indexer(&bus).await;
        let id = drone(1);
        let task = IndexTask {
            after_triples: vec![Triple::new(
                id.clone(),
                "robotics.battery.level",
                TripleObject::Number(1.0),
                "t",
            )],
            ..titled_task(id, "ignored")
        };
        indexer.apply(&task).await.unwrap();
        assert!(index.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vector_stored_and_deduped() {
        let bus = MemoryBus::new();
        let (indexer, index, dedup) = indexer(&bus).await;

        indexer.apply(&titled_task(drone(1), "Rescue drone")).await.unwrap();
        indexer.apply(&titled_task(drone(2), "Rescue drone")).await.unwrap();

        let first = index.get(drone(1).as_str()).await.unwrap().unwrap();
        let second = index.get(drone(2).as_str()).await.unwrap().unwrap();
        let a: EmbeddingRecord = serde_json::from_slice(&first.value).unwrap();
        let b: EmbeddingRecord = serde_json::from_slice(&second.value).unwrap();
        assert_eq!(a.vector, b.vector, "identical text reuses the vector");
        assert_eq!(dedup.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_text_not_rewritten() {
        let bus = MemoryBus::new();
        let (indexer, index, _) = indexer(&bus).await;

        indexer.apply(&titled_task(drone(1), "Rescue drone")).await.unwrap();
        let before = index.get(drone(1).as_str()).await.unwrap().unwrap().revision;
        indexer.apply(&titled_task(drone(1), "Rescue drone")).await.unwrap();
        let after = index.get(drone(1).as_str()).await.unwrap().unwrap().revision;
        assert_eq!(before, after);
    }
}
