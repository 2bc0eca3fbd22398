//! The evaluation loop: KV watch → cooldown gate → condition eval under
//! budgets → action → publish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use semstreams_bus::{KvStore, MessageBus, WatchEvent, WatchOp, WatchStart, buckets};
use semstreams_flow::{Component, ComponentContext, ComponentKind, FlowError, Health};
use semstreams_msg::{EntityState, Message, MessageType, Payload};

use crate::action::ActionRegistry;
use crate::cooldown::CooldownMap;
use crate::error::RuleError;
use crate::eval::evaluate;
use crate::metrics::RulesMetrics;
use crate::rule::{CompiledRule, Rule};

/// Rules engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// The rule set.
    pub rules: Vec<Rule>,
    /// Buckets to watch.
    pub watch_buckets: Vec<String>,
    /// Subject prefix for derived events; the rule ID is appended as one
    /// token. Namespaced away from `events.log.*` so the logger can never
    /// feed back into the engine.
    pub output_subject_prefix: String,
    /// Per-rule CPU budget in milliseconds.
    pub per_rule_budget_ms: u64,
    /// Total engine budget per watch event in milliseconds.
    pub per_event_budget_ms: u64,
    /// Persist the watch revision every N events.
    pub checkpoint_every: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            watch_buckets: vec![buckets::ENTITY_STATES.to_string()],
            output_subject_prefix: "events.rules".into(),
            per_rule_budget_ms: 10,
            per_event_budget_ms: 100,
            checkpoint_every: 32,
        }
    }
}

impl RulesConfig {
    /// Parse from a component's JSON `config` block.
    ///
    /// # Errors
    ///
    /// Returns a decode error when present fields have the wrong shape.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
    }
}

/// The rules engine component.
pub struct RulesEngine {
    name: String,
    config: RulesConfig,
    rules: Arc<Vec<CompiledRule>>,
    actions: Arc<ActionRegistry>,
    cooldowns: Arc<CooldownMap>,
    metrics: RulesMetrics,
    handles: Vec<JoinHandle<()>>,
}

impl RulesEngine {
    /// Compile the rule set and build the engine.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] for any invalid rule, refusing the whole set —
    /// a half-loaded rule set is worse than a failed startup.
    pub fn new(
        name: impl Into<String>,
        config: RulesConfig,
        actions: ActionRegistry,
        metrics: RulesMetrics,
    ) -> Result<Self, RuleError> {
        let mut compiled = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let rule = CompiledRule::compile(rule.clone())?;
            // Fail fast on unknown rule types too.
            if rule.rule.enabled {
                actions.get(&rule.rule.rule_type)?;
            }
            compiled.push(rule);
        }
        Ok(Self {
            name: name.into(),
            config,
            rules: Arc::new(compiled),
            actions: Arc::new(actions),
            cooldowns: Arc::new(CooldownMap::new()),
            metrics,
            handles: Vec::new(),
        })
    }

    /// The output subject for one rule's derived events.
    #[must_use]
    pub fn output_subject(prefix: &str, rule_id: &str) -> String {
        let token: String = rule_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{prefix}.{token}")
    }

    /// Handle one watch event: evaluate every matching rule under the
    /// engine budgets and publish what the actions derive.
    #[allow(clippy::too_many_arguments)]
    async fn handle_event(
        bus: &dyn MessageBus,
        rules: &[CompiledRule],
        actions: &ActionRegistry,
        cooldowns: &CooldownMap,
        config: &RulesConfig,
        metrics: &RulesMetrics,
        bucket: &str,
        event: &WatchEvent,
    ) {
        let Some(value) = &event.value else { return };
        let Ok(state) = serde_json::from_slice::<EntityState>(value) else {
            debug!(bucket, key = event.key, "watched value is not entity state");
            return;
        };

        let event_started = Instant::now();
        let event_budget = Duration::from_millis(config.per_event_budget_ms);
        let rule_budget = Duration::from_millis(config.per_rule_budget_ms);
        metrics.events_evaluated.with_label_values(&[bucket]).inc();

        for compiled in rules {
            if event_started.elapsed() >= event_budget {
                metrics.budget_overruns.with_label_values(&["event"]).inc();
                warn!(entity = event.key, "event budget exhausted, short-circuiting");
                break;
            }
            let rule = &compiled.rule;
            if !rule.enabled || !state.node.id.matches_glob(&rule.entity.pattern) {
                continue;
            }
            if let Some(rule_buckets) = &rule.entity.watch_buckets
                && !rule_buckets.iter().any(|b| b == bucket)
            {
                continue;
            }

            if cooldowns.is_cooling(&rule.id, event.key.as_str(), compiled.cooldown) {
                metrics.cooldown_skips.with_label_values(&[&rule.id]).inc();
                continue;
            }

            let rule_started = Instant::now();
            let matched = evaluate(compiled, &state);
            if rule_started.elapsed() >= rule_budget {
                metrics.budget_overruns.with_label_values(&["rule"]).inc();
                warn!(rule = rule.id, "rule budget exceeded");
                continue;
            }
            if !matched {
                continue;
            }

            let payloads = match actions.get(&rule.rule_type).and_then(|a| a.derive(rule, &state))
            {
                Ok(payloads) => payloads,
                Err(error) => {
                    warn!(rule = rule.id, %error, "action failed");
                    continue;
                }
            };

            let subject = Self::output_subject(&config.output_subject_prefix, &rule.id);
            for payload in payloads {
                let message = Message::new(
                    MessageType::new("events", "rules", "v1"),
                    payload.to_json(),
                    format!("rules:{}", rule.id),
                );
                if let Err(error) = bus.publish(&subject, &message).await {
                    warn!(rule = rule.id, %error, "failed to publish derived event");
                }
            }

            metrics.rules_fired.with_label_values(&[&rule.id]).inc();
            cooldowns.arm(&rule.id, event.key.as_str());
        }

        metrics
            .evaluation_duration
            .observe(event_started.elapsed().as_secs_f64());
    }

    fn checkpoint_key(bucket: &str) -> String {
        format!("revision_{bucket}")
    }

    async fn load_checkpoint(state_kv: &dyn KvStore, bucket: &str) -> WatchStart {
        let key = Self::checkpoint_key(bucket);
        match state_kv.get(&key).await {
            Ok(Some(entry)) => String::from_utf8_lossy(&entry.value)
                .parse::<u64>()
                .map_or(WatchStart::New, WatchStart::Revision),
            _ => WatchStart::New,
        }
    }
}

#[async_trait]
impl Component for RulesEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Storage
    }

    async fn start(&mut self, ctx: ComponentContext) -> Result<(), FlowError> {
        let state_kv = ctx.bus.kv(buckets::RULES_STATE).await.map_err(FlowError::Bus)?;

        for bucket in self.config.watch_buckets.clone() {
            let kv = ctx.bus.kv(&bucket).await.map_err(FlowError::Bus)?;
            let start = Self::load_checkpoint(state_kv.as_ref(), &bucket).await;
            let mut watch = kv.watch(">", start).await.map_err(FlowError::Bus)?;
            info!(component = self.name, bucket, ?start, "rules engine watching");

            let bus = Arc::clone(&ctx.bus);
            let rules = Arc::clone(&self.rules);
            let actions = Arc::clone(&self.actions);
            let cooldowns = Arc::clone(&self.cooldowns);
            let config = self.config.clone();
            let metrics = self.metrics.clone();
            let state_kv = Arc::clone(&state_kv);

            self.handles.push(tokio::spawn(async move {
                let mut since_checkpoint: u64 = 0;
                while let Some(event) = watch.recv().await {
                    if event.op == WatchOp::Put {
                        Self::handle_event(
                            bus.as_ref(),
                            &rules,
                            &actions,
                            &cooldowns,
                            &config,
                            &metrics,
                            &bucket,
                            &event,
                        )
                        .await;
                    }

                    since_checkpoint += 1;
                    if since_checkpoint >= config.checkpoint_every {
                        since_checkpoint = 0;
                        let key = Self::checkpoint_key(&bucket);
                        if let Err(error) = state_kv
                            .put(&key, event.revision.to_string().into_bytes())
                            .await
                        {
                            warn!(bucket, %error, "checkpoint write failed");
                        }
                    }
                }
            }));
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), FlowError> {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!(component = self.name, "rules engine stopped");
        Ok(())
    }

    fn health(&self) -> Health {
        Health::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_subject_tokenised() {
        assert_eq!(
            RulesEngine::output_subject("events.rules", "battery-low"),
            "events.rules.battery_low"
        );
        assert_eq!(
            RulesEngine::output_subject("events.rules", "a.b c"),
            "events.rules.a_b_c"
        );
    }

    #[test]
    fn test_unknown_rule_type_refused() {
        let config = RulesConfig {
            rules: vec![serde_json::from_value(serde_json::json!({
                "id": "r1",
                "type": "no-such-action",
                "entity": {"pattern": "*.*.*.*.*.*"},
                "cooldown": "1m"
            }))
            .unwrap()],
            ..RulesConfig::default()
        };
        let result = RulesEngine::new(
            "rules",
            config,
            ActionRegistry::with_defaults(),
            RulesMetrics::unregistered(),
        );
        assert!(matches!(result, Err(RuleError::UnknownRuleType(_))));
    }
}
