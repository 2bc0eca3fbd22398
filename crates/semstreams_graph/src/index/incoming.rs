//! Incoming index: reverse-edge lookup.
//!
//! Key: target entity ID. Value: list of source entity IDs. For every
//! outgoing edge `(A → p → B)` the writer appends `A` under `B`; when A's
//! last edge to B disappears, the same writer removes it in a CAS loop.

use std::collections::BTreeSet;
use std::sync::Arc;

use semstreams_bus::{DEFAULT_CAS_ATTEMPTS, KvStore, update_with_retry};

use crate::error::GraphError;
use crate::index::{IndexFamily, IndexTask, decode_list, encode_list};

/// Maintains `INCOMING_INDEX`.
pub struct IncomingIndexer {
    kv: Arc<dyn KvStore>,
}

impl IncomingIndexer {
    /// Wrap the incoming bucket.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait::async_trait]
impl IndexFamily for IncomingIndexer {
    fn family(&self) -> &'static str {
        "incoming"
    }

    async fn apply(&self, task: &IndexTask) -> Result<(), GraphError> {
        let source = task.entity_id.as_str();
        let before: BTreeSet<&str> = task.before_edges.iter().map(|e| e.target.as_str()).collect();
        let after: BTreeSet<&str> = task.after_edges.iter().map(|e| e.target.as_str()).collect();

        for target in after.difference(&before) {
            update_with_retry(self.kv.as_ref(), target, DEFAULT_CAS_ATTEMPTS, |current| {
                let mut list = decode_list(current);
                if list.iter().any(|e| e == source) {
                    return Ok(None);
                }
                list.push(source.to_string());
                Ok(Some(encode_list(&list)?))
            })
            .await?;
        }

        for target in before.difference(&after) {
            update_with_retry(self.kv.as_ref(), target, DEFAULT_CAS_ATTEMPTS, |current| {
                let mut list = decode_list(current);
                let len = list.len();
                list.retain(|e| e != source);
                if list.len() == len {
                    return Ok(None);
                }
                Ok(Some(encode_list(&list)?))
            })
            .await?;
        }
        Ok(())
    }
}
