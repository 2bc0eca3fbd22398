//! KV bucket names.
//!
//! Every bucket is a separate namespace in the KV store. `ENTITY_STATES` is
//! the source of truth; the rest are secondary indexes reconciled by the
//! writer that last touched them.

/// Durable entity records, keyed by entity ID.
pub const ENTITY_STATES: &str = "ENTITY_STATES";

/// Sanitised predicate → list of asserting entity IDs.
pub const PREDICATE_INDEX: &str = "PREDICATE_INDEX";

/// Target entity ID → list of source entity IDs (reverse edges).
pub const INCOMING_INDEX: &str = "INCOMING_INDEX";

/// `alias--<alias>` → entity ID and `entity--<id>` → alias list.
pub const ALIAS_INDEX: &str = "ALIAS_INDEX";

/// `geo_<p>_<latBin>_<lonBin>` → bin contents.
pub const SPATIAL_INDEX: &str = "SPATIAL_INDEX";

/// `YYYY.MM.DD.HH` → events + distinct entity count.
pub const TEMPORAL_INDEX: &str = "TEMPORAL_INDEX";

/// Entity ID → embedding vector + model + text hash.
pub const EMBEDDING_INDEX: &str = "EMBEDDING_INDEX";

/// Text content hash → entity ID, to avoid re-embedding.
pub const EMBEDDING_DEDUP: &str = "EMBEDDING_DEDUP";

/// Live configuration overrides (reset on restart).
pub const CONFIG: &str = "CONFIG";

/// Rules engine checkpoint state (last watched revision).
pub const RULES_STATE: &str = "RULES_STATE";
