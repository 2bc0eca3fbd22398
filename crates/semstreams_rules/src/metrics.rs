//! Prometheus metrics for the rules engine.

use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};

/// Counter and histogram families for the rules subsystem.
#[derive(Clone)]
pub struct RulesMetrics {
    /// Watch events evaluated, by bucket.
    pub events_evaluated: IntCounterVec,
    /// Rule firings, by rule ID.
    pub rules_fired: IntCounterVec,
    /// Evaluations skipped because the cooldown was armed, by rule ID.
    pub cooldown_skips: IntCounterVec,
    /// Budget overruns, by scope (`rule` or `event`).
    pub budget_overruns: IntCounterVec,
    /// End-to-end evaluation latency per watch event.
    pub evaluation_duration: Histogram,
}

impl RulesMetrics {
    /// Create and register all collectors.
    ///
    /// # Errors
    ///
    /// Returns a [`prometheus::Error`] on duplicate registration.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let events_evaluated = IntCounterVec::new(
            Opts::new("rules_events_evaluated_total", "Watch events evaluated"),
            &["bucket"],
        )?;
        let rules_fired = IntCounterVec::new(
            Opts::new("rules_fired_total", "Rule firings"),
            &["rule"],
        )?;
        let cooldown_skips = IntCounterVec::new(
            Opts::new("rules_cooldown_skips_total", "Evaluations skipped by cooldown"),
            &["rule"],
        )?;
        let budget_overruns = IntCounterVec::new(
            Opts::new("rules_budget_overruns_total", "CPU budget overruns"),
            &["scope"],
        )?;
        let evaluation_duration = Histogram::with_opts(HistogramOpts::new(
            "rules_evaluation_duration_seconds",
            "Evaluation latency per watch event",
        ))?;

        registry.register(Box::new(events_evaluated.clone()))?;
        registry.register(Box::new(rules_fired.clone()))?;
        registry.register(Box::new(cooldown_skips.clone()))?;
        registry.register(Box::new(budget_overruns.clone()))?;
        registry.register(Box::new(evaluation_duration.clone()))?;

        Ok(Self {
            events_evaluated,
            rules_fired,
            cooldown_skips,
            budget_overruns,
            evaluation_duration,
        })
    }

    /// A metrics instance on a throwaway registry, for tests.
    ///
    /// # Panics
    ///
    /// Never in practice: registration on a fresh registry cannot collide.
    #[must_use]
    pub fn unregistered() -> Self {
        #[allow(clippy::expect_used)]
        Self::new(&Registry::new()).expect("fresh registry")
    }
}
