//! Predicate index: "who asserts this predicate?"
//!
//! Key: sanitised predicate. Value: deduplicated list of entity IDs. The
//! dedup is maintained inside the CAS transform, so concurrent writers
//! cannot introduce duplicates.

use std::collections::BTreeSet;
use std::sync::Arc;

use semstreams_bus::{DEFAULT_CAS_ATTEMPTS, KvStore, update_with_retry};

use crate::error::GraphError;
use crate::index::{IndexFamily, IndexTask, decode_list, encode_list};
use crate::sanitize::sanitize;

/// Maintains `PREDICATE_INDEX`.
pub struct PredicateIndexer {
    kv: Arc<dyn KvStore>,
}

impl PredicateIndexer {
    /// Wrap the predicate bucket.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn add(&self, predicate_key: &str, entity: &str) -> Result<(), GraphError> {
        update_with_retry(self.kv.as_ref(), predicate_key, DEFAULT_CAS_ATTEMPTS, |current| {
            let mut list = decode_list(current);
            if list.iter().any(|e| e == entity) {
                return Ok(None);
            }
            list.push(entity.to_string());
            Ok(Some(encode_list(&list)?))
        })
        .await?;
        Ok(())
    }

    async fn remove(&self, predicate_key: &str, entity: &str) -> Result<(), GraphError> {
        update_with_retry(self.kv.as_ref(), predicate_key, DEFAULT_CAS_ATTEMPTS, |current| {
            let mut list = decode_list(current);
            let before = list.len();
            list.retain(|e| e != entity);
            if list.len() == before {
                return Ok(None);
            }
            Ok(Some(encode_list(&list)?))
        })
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl IndexFamily for PredicateIndexer {
    fn family(&self) -> &'static str {
        "predicate"
    }

    async fn apply(&self, task: &IndexTask) -> Result<(), GraphError> {
        let entity = task.entity_id.as_str();
        let before: BTreeSet<String> = task
            .before_triples
            .iter()
            .map(|t| sanitize(&t.predicate))
            .collect();
        let after: BTreeSet<String> = task
            .after_triples
            .iter()
            .map(|t| sanitize(&t.predicate))
            .collect();

        for key in after.difference(&before) {
            self.add(key, entity).await?;
        }
        for key in before.difference(&after) {
            self.remove(key, entity).await?;
        }
        Ok(())
    }
}
