//! Bounded, decay-weighted depth-first traversal over the entity graph.
//!
//! Relevance of a discovered entity is `parent_score × decay`. Exhausting
//! the depth bound is natural termination; exhausting the node, time or
//! path budget marks the result `truncated=true` — that flag is contractual,
//! not a best-effort warning.

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use semstreams_bus::KvStore;
use semstreams_msg::{EntityId, EntityState};

use crate::error::GraphError;

/// Traversal parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraverseRequest {
    /// Start entity.
    pub start: EntityId,
    /// Maximum edge distance from the start.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Maximum entities in the result.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
    /// Wall-clock budget in milliseconds.
    #[serde(default = "default_max_time_ms")]
    pub max_time_ms: u64,
    /// Maximum edges followed.
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
    /// Score decay per hop.
    #[serde(default = "default_decay")]
    pub decay: f64,
    /// Only follow outgoing edges whose predicate starts with this prefix.
    /// When set, reverse-edge expansion is disabled (the incoming index
    /// carries no predicate information).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_filter: Option<String>,
}

fn default_max_depth() -> u32 {
    3
}
fn default_max_nodes() -> usize {
    100
}
fn default_max_time_ms() -> u64 {
    500
}
fn default_max_paths() -> usize {
    1_000
}
fn default_decay() -> f64 {
    0.85
}

impl TraverseRequest {
    /// Defaults with a start entity.
    #[must_use]
    pub fn from_start(start: EntityId) -> Self {
        Self {
            start,
            max_depth: default_max_depth(),
            max_nodes: default_max_nodes(),
            max_time_ms: default_max_time_ms(),
            max_paths: default_max_paths(),
            decay: default_decay(),
            edge_filter: None,
        }
    }
}

/// One discovered entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalNode {
    /// The entity.
    pub id: EntityId,
    /// Decayed relevance, 1.0 at the start entity.
    pub score: f64,
    /// Edge distance from the start.
    pub depth: u32,
}

/// Traversal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraverseResult {
    /// Discovered entities in visit order. No entity appears twice.
    pub nodes: Vec<TraversalNode>,
    /// Whether a node/time/path budget fired before exploration finished.
    pub truncated: bool,
}

/// Run the traversal against the entity and incoming buckets.
///
/// # Errors
///
/// Returns [`GraphError`] on KV failures; missing entities are simply not
/// expanded.
pub async fn traverse(
    entities: &dyn KvStore,
    incoming: &dyn KvStore,
    request: &TraverseRequest,
) -> Result<TraverseResult, GraphError> {
    let started = Instant::now();
    let budget = std::time::Duration::from_millis(request.max_time_ms);

    let mut visited: HashSet<EntityId> = HashSet::new();
    let mut nodes: Vec<TraversalNode> = Vec::new();
    let mut truncated = false;
    let mut paths: usize = 0;

    let mut stack: Vec<(EntityId, u32, f64)> = vec![(request.start.clone(), 0, 1.0)];

    'outer: while let Some((id, depth, score)) = stack.pop() {
        if visited.contains(&id) {
            continue;
        }
        if started.elapsed() >= budget || nodes.len() >= request.max_nodes {
            truncated = true;
            break;
        }
        visited.insert(id.clone());
        nodes.push(TraversalNode {
            id: id.clone(),
            score,
            depth,
        });

        if depth >= request.max_depth {
            continue;
        }

        for neighbour in neighbours(entities, incoming, &id, request.edge_filter.as_deref()).await?
        {
            if visited.contains(&neighbour) {
                continue;
            }
            paths += 1;
            if paths > request.max_paths {
                truncated = true;
                break 'outer;
            }
            stack.push((neighbour, depth + 1, score * request.decay));
        }
    }

    Ok(TraverseResult { nodes, truncated })
}

/// Outgoing edge targets (optionally filtered by predicate prefix) plus
/// reverse-edge sources.
async fn neighbours(
    entities: &dyn KvStore,
    incoming: &dyn KvStore,
    id: &EntityId,
    edge_filter: Option<&str>,
) -> Result<Vec<EntityId>, GraphError> {
    let mut result = Vec::new();

    if let Some(entry) = entities.get(id.as_str()).await? {
        let state: EntityState =
            serde_json::from_slice(&entry.value).map_err(|e| GraphError::CorruptValue {
                key: id.as_str().to_string(),
                source: e,
            })?;
        for edge in &state.edges {
            if edge_filter.is_none_or(|prefix| edge.predicate.starts_with(prefix)) {
                result.push(edge.target.clone());
            }
        }
    }

    if edge_filter.is_none()
        && let Some(entry) = incoming.get(id.as_str()).await?
    {
        let sources: Vec<String> = serde_json::from_slice(&entry.value).unwrap_or_default();
        for source in sources {
            if let Ok(source_id) = EntityId::parse(source) {
                result.push(source_id);
            }
        }
    }

    Ok(result)
}
