//! Temporal index: hourly activity windows.
//!
//! Key: `YYYY.MM.DD.HH` in UTC. Value: the events that touched the hour and
//! a distinct-entity count. Range queries enumerate the covered hour keys
//! and union the sets.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use semstreams_bus::{DEFAULT_CAS_ATTEMPTS, KvStore, update_with_retry};

use crate::error::GraphError;
use crate::index::{IndexFamily, IndexTask};

/// Hard cap on events retained per hour bucket.
const MAX_EVENTS_PER_BUCKET: usize = 10_000;

/// The hour-bucket key for a timestamp.
#[must_use]
pub fn hour_key(at: DateTime<Utc>) -> String {
    at.format("%Y.%m.%d.%H").to_string()
}

/// All hour keys covering `[from, to]`, oldest first.
#[must_use]
pub fn hour_keys_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<String> {
    if to < from {
        return Vec::new();
    }
    let mut keys = Vec::new();
    let mut cursor = from
        .duration_trunc(ChronoDuration::hours(1))
        .unwrap_or(from);
    while cursor <= to {
        keys.push(hour_key(cursor));
        cursor += ChronoDuration::hours(1);
    }
    keys
}

/// One entity touch inside an hour bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalEvent {
    /// The touched entity.
    pub entity: String,
    /// Its type label.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// The touch timestamp.
    pub timestamp: DateTime<Utc>,
}

/// The value stored per hour bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemporalBucket {
    /// Touches in this hour.
    pub events: Vec<TemporalEvent>,
    /// Count of distinct entities in this hour.
    pub entity_count: u64,
}

/// Maintains `TEMPORAL_INDEX`.
pub struct TemporalIndexer {
    kv: Arc<dyn KvStore>,
}

impl TemporalIndexer {
    /// Wrap the temporal bucket.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait::async_trait]
impl IndexFamily for TemporalIndexer {
    fn family(&self) -> &'static str {
        "temporal"
    }

    async fn apply(&self, task: &IndexTask) -> Result<(), GraphError> {
        let key = hour_key(task.observed_at);
        let event = TemporalEvent {
            entity: task.entity_id.as_str().to_string(),
            entity_type: task.entity_type.clone(),
            timestamp: task.observed_at,
        };

        update_with_retry(self.kv.as_ref(), &key, DEFAULT_CAS_ATTEMPTS, |current| {
            let mut bucket: TemporalBucket = current
                .and_then(|b| serde_json::from_slice(b).ok())
                .unwrap_or_default();
            if bucket.events.len() >= MAX_EVENTS_PER_BUCKET {
                bucket.events.remove(0);
            }
            bucket.events.push(event.clone());
            let distinct: BTreeSet<&str> =
                bucket.events.iter().map(|e| e.entity.as_str()).collect();
            bucket.entity_count = distinct.len() as u64;
            Ok(Some(serde_json::to_vec(&bucket).map_err(semstreams_bus::BusError::Codec)?))
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semstreams_bus::{MemoryBus, MessageBus};
    use semstreams_msg::EntityId;

    fn drone(n: u32) -> EntityId {
        EntityId::parse(format!("acme.plat1.robotics.gcs1.drone.{n:03}")).unwrap()
    }

    fn task(id: EntityId, at: DateTime<Utc>) -> IndexTask {
        IndexTask {
            entity_id: id,
            entity_type: "drone".into(),
            before_triples: vec![],
            after_triples: vec![],
            before_edges: vec![],
            after_edges: vec![],
            position: None,
            observed_at: at,
        }
    }

    #[test]
    fn test_hour_key_format() {
        let at: DateTime<Utc> = "2026-03-05T17:42:10Z".parse().unwrap();
        assert_eq!(hour_key(at), "2026.03.05.17");
    }

    #[test]
    fn test_hour_keys_between() {
        let from: DateTime<Utc> = "2026-03-05T22:10:00Z".parse().unwrap();
        let to: DateTime<Utc> = "2026-03-06T01:05:00Z".parse().unwrap();
        assert_eq!(
            hour_keys_between(from, to),
            vec!["2026.03.05.22", "2026.03.05.23", "2026.03.06.00", "2026.03.06.01"]
        );
        assert!(hour_keys_between(to, from).is_empty());
    }

    #[tokio::test]
    async fn test_distinct_entity_count() {
        let bus = MemoryBus::new();
        let kv = bus.kv("TEMPORAL_INDEX").await.unwrap();
        let indexer = TemporalIndexer::new(Arc::clone(&kv));
        let at: DateTime<Utc> = "2026-03-05T17:00:00Z".parse().unwrap();

        indexer.apply(&task(drone(1), at)).await.unwrap();
        indexer.apply(&task(drone(1), at)).await.unwrap();
        indexer.apply(&task(drone(2), at)).await.unwrap();

        let entry = kv.get("2026.03.05.17").await.unwrap().unwrap();
        let bucket: TemporalBucket = serde_json::from_slice(&entry.value).unwrap();
        assert_eq!(bucket.events.len(), 3);
        assert_eq!(bucket.entity_count, 2);
    }
}
