//! # semstreams_rules — the rules engine
//!
//! Watches `ENTITY_STATES` (and optionally other buckets), evaluates a
//! declarative rule set against each change under strict CPU budgets, emits
//! derived entities/edges as normal graph events, and enforces per-entity
//! cooldowns: at-most-once within a cooldown, at-least-once across them.
//! Consumers must be idempotent on message hash — restart may replay the
//! window after the last checkpointed revision.

pub mod action;
pub mod cooldown;
pub mod engine;
pub mod error;
pub mod eval;
pub mod metrics;
pub mod rule;

pub use action::{ActionRegistry, AlertAction, DeriveEdgeAction, RuleAction};
pub use cooldown::CooldownMap;
pub use engine::{RulesConfig, RulesEngine};
pub use error::RuleError;
pub use metrics::RulesMetrics;
pub use rule::{CompiledRule, Condition, Logic, Operator, Rule, parse_duration};
