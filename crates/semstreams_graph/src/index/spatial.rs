//! Spatial index: integer-binned proximity lookup.
//!
//! Not a base-32 geohash. Bins are computed as
//! `latBin = floor((lat + 90) × M(p))`, `lonBin = floor((lon + 180) × M(p))`
//! with a per-precision multiplier; precision 7 yields roughly 30 m bins at
//! the equator. Proximity queries fetch adjacent bins and return entities
//! as-is — distance refinement is the caller's job.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use semstreams_bus::{DEFAULT_CAS_ATTEMPTS, KvStore, update_with_retry};
use semstreams_msg::{Position, Triple, vocabulary::names};

use crate::error::GraphError;
use crate::index::{IndexFamily, IndexTask};

/// Lowest supported precision level.
pub const MIN_PRECISION: u8 = 4;

/// Highest supported precision level.
pub const MAX_PRECISION: u8 = 8;

/// Per-precision bin multiplier: degrees × multiplier → bin index.
///
/// Level 7 (`×3600`) gives 1/3600° ≈ 31 m of latitude per bin.
#[must_use]
pub fn multiplier(precision: u8) -> f64 {
    match precision.clamp(MIN_PRECISION, MAX_PRECISION) {
        4 => 36.0,
        5 => 360.0,
        6 => 1_200.0,
        7 => 3_600.0,
        _ => 36_000.0,
    }
}

/// Bin indexes for a coordinate at a precision level.
#[must_use]
pub fn bin_for(lat: f64, lon: f64, precision: u8) -> (i64, i64) {
    let m = multiplier(precision);
    (
        ((lat + 90.0) * m).floor() as i64,
        ((lon + 180.0) * m).floor() as i64,
    )
}

/// KV key for a bin.
#[must_use]
pub fn bin_key(precision: u8, lat_bin: i64, lon_bin: i64) -> String {
    format!("geo_{precision}_{lat_bin}_{lon_bin}")
}

/// One entity's entry inside a bin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialEntry {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Altitude in metres, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
    /// When the position was last updated.
    pub updated: DateTime<Utc>,
}

/// The value stored at each bin key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpatialBin {
    /// Entities currently in the bin.
    pub entities: BTreeMap<String, SpatialEntry>,
    /// When the bin was last touched.
    pub last_update: Option<DateTime<Utc>>,
}

/// Extract a position from triples carrying latitude/longitude predicates.
#[must_use]
pub fn position_from_triples(triples: &[Triple]) -> Option<Position> {
    let value_of = |predicate: &str| {
        triples
            .iter()
            .find(|t| t.predicate == predicate)
            .and_then(|t| t.object.as_number())
    };
    let lat = value_of(names::LATITUDE)?;
    let lon = value_of(names::LONGITUDE)?;
    Some(Position {
        lat,
        lon,
        alt: value_of(names::ALTITUDE),
    })
}

/// Maintains `SPATIAL_INDEX`.
pub struct SpatialIndexer {
    kv: Arc<dyn KvStore>,
    precision: u8,
}

impl SpatialIndexer {
    /// Wrap the spatial bucket at a precision level (clamped to 4–8).
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, precision: u8) -> Self {
        Self {
            kv,
            precision: precision.clamp(MIN_PRECISION, MAX_PRECISION),
        }
    }

    async fn upsert_entry(
        &self,
        key: &str,
        entity: &str,
        entry: SpatialEntry,
    ) -> Result<(), GraphError> {
        update_with_retry(self.kv.as_ref(), key, DEFAULT_CAS_ATTEMPTS, |current| {
            let mut bin: SpatialBin = current
                .and_then(|b| serde_json::from_slice(b).ok())
                .unwrap_or_default();
            bin.entities.insert(entity.to_string(), entry.clone());
            bin.last_update = Some(Utc::now());
            Ok(Some(serde_json::to_vec(&bin).map_err(semstreams_bus::BusError::Codec)?))
        })
        .await?;
        Ok(())
    }

    async fn remove_entry(&self, key: &str, entity: &str) -> Result<(), GraphError> {
        update_with_retry(self.kv.as_ref(), key, DEFAULT_CAS_ATTEMPTS, |current| {
            let mut bin: SpatialBin = current
                .and_then(|b| serde_json::from_slice(b).ok())
                .unwrap_or_default();
            if bin.entities.remove(entity).is_none() {
                return Ok(None);
            }
            bin.last_update = Some(Utc::now());
            Ok(Some(serde_json::to_vec(&bin).map_err(semstreams_bus::BusError::Codec)?))
        })
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl IndexFamily for SpatialIndexer {
    fn family(&self) -> &'static str {
        "spatial"
    }

    async fn apply(&self, task: &IndexTask) -> Result<(), GraphError> {
        let position = task
            .position
            .or_else(|| position_from_triples(&task.after_triples));
        let Some(position) = position else {
            return Ok(());
        };

        let entity = task.entity_id.as_str();
        let (lat_bin, lon_bin) = bin_for(position.lat, position.lon, self.precision);
        let key = bin_key(self.precision, lat_bin, lon_bin);

        // Entity moved bins: drop it from the old one first.
        if let Some(previous) = position_from_triples(&task.before_triples) {
            let old = bin_for(previous.lat, previous.lon, self.precision);
            if old != (lat_bin, lon_bin) {
                let old_key = bin_key(self.precision, old.0, old.1);
                self.remove_entry(&old_key, entity).await?;
            }
        }

        self.upsert_entry(
            &key,
            entity,
            SpatialEntry {
                lat: position.lat,
                lon: position.lon,
                alt: position.alt,
                updated: task.observed_at,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semstreams_bus::{MemoryBus, MessageBus};
    use semstreams_msg::{EntityId, TripleObject};

    fn drone(n: u32) -> EntityId {
        EntityId::parse(format!("acme.plat1.robotics.gcs1.drone.{n:03}")).unwrap()
    }

    fn located_task(id: EntityId, lat: f64, lon: f64) -> IndexTask {
        IndexTask {
            entity_id: id,
            entity_type: "drone".into(),
            before_triples: vec![],
            after_triples: vec![],
            before_edges: vec![],
            after_edges: vec![],
            position: Some(Position { lat, lon, alt: None }),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_binning_adjacent_and_distant() {
        // The two nearby points from the proximity scenario land within one
        // bin of each other at precision 7; the distant one does not.
        let a = bin_for(37.7749, -122.4194, 7);
        let b = bin_for(37.7750, -122.4195, 7);
        let c = bin_for(37.8000, -122.5000, 7);
        assert!((a.0 - b.0).abs() <= 1 && (a.1 - b.1).abs() <= 1);
        assert!((a.0 - c.0).abs() > 1 || (a.1 - c.1).abs() > 1);
    }

    #[test]
    fn test_precision_clamped() {
        assert_eq!(multiplier(0), multiplier(4));
        assert_eq!(multiplier(99), multiplier(8));
    }

    #[test]
    fn test_position_from_triples() {
        let id = drone(1);
        let triples = vec![
            Triple::new(id.clone(), names::LATITUDE, TripleObject::Number(37.0), "t"),
            Triple::new(id, names::LONGITUDE, TripleObject::Number(-122.0), "t"),
        ];
        let position = position_from_triples(&triples).unwrap();
        assert_eq!(position.lat, 37.0);
        assert_eq!(position.lon, -122.0);
        assert!(position.alt.is_none());
    }

    #[tokio::test]
    async fn test_entity_recorded_in_bin() {
        let bus = MemoryBus::new();
        let kv = bus.kv("SPATIAL_INDEX").await.unwrap();
        let indexer = SpatialIndexer::new(Arc::clone(&kv), 7);

        indexer
            .apply(&located_task(drone(1), 37.7749, -122.4194))
            .await
            .unwrap();

        let (lat_bin, lon_bin) = bin_for(37.7749, -122.4194, 7);
        let entry = kv
            .get(&bin_key(7, lat_bin, lon_bin))
            .await
            .unwrap()
            .unwrap();
        let bin: SpatialBin = serde_json::from_slice(&entry.value).unwrap();
        assert!(bin.entities.contains_key(drone(1).as_str()));
    }
}
