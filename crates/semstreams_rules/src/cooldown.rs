//! Per-(rule, entity) cooldown bookkeeping.
//!
//! At-most-once within a cooldown: a token is acquired before evaluation
//! and armed only when the rule actually fires.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Tracks the last firing time per (rule, entity).
#[derive(Debug, Default)]
pub struct CooldownMap {
    armed: DashMap<(String, String), Instant>,
}

impl CooldownMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the (rule, entity) pair is still cooling down.
    #[must_use]
    pub fn is_cooling(&self, rule: &str, entity: &str, cooldown: Duration) -> bool {
        self.armed
            .get(&(rule.to_string(), entity.to_string()))
            .is_some_and(|at| at.elapsed() < cooldown)
    }

    /// Arm the cooldown after a firing.
    pub fn arm(&self, rule: &str, entity: &str) {
        self.armed
            .insert((rule.to_string(), entity.to_string()), Instant::now());
    }

    /// Drop entries whose cooldown has fully elapsed.
    pub fn sweep(&self, cooldown: Duration) {
        self.armed.retain(|_, at| at.elapsed() < cooldown);
    }

    /// Number of armed cooldowns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    /// Whether no cooldowns are armed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_cycle() {
        let map = CooldownMap::new();
        let cooldown = Duration::from_millis(50);

        assert!(!map.is_cooling("r", "e", cooldown));
        map.arm("r", "e");
        assert!(map.is_cooling("r", "e", cooldown));
        assert!(!map.is_cooling("r", "other", cooldown), "per entity");

        std::thread::sleep(Duration::from_millis(60));
        assert!(!map.is_cooling("r", "e", cooldown), "cooldown expired");
    }

    #[test]
    fn test_sweep_drops_expired() {
        let map = CooldownMap::new();
        map.arm("r", "e");
        std::thread::sleep(Duration::from_millis(10));
        map.sweep(Duration::from_millis(1));
        assert!(map.is_empty());
    }
}
