//! Rule model: shape, operators, validation and compilation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RuleError;

/// Condition combination logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    /// Every evaluated condition must hold.
    And,
    /// At least one evaluated condition must hold.
    Or,
}

impl Default for Logic {
    fn default() -> Self {
        Self::And
    }
}

/// Condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Numeric less-than.
    Lt,
    /// Numeric less-than-or-equal.
    Lte,
    /// Numeric greater-than.
    Gt,
    /// Numeric greater-than-or-equal.
    Gte,
    /// Inclusive numeric range; value is `[lo, hi]`.
    Between,
    /// Membership in a value list.
    In,
    /// Non-membership in a value list.
    NotIn,
    /// Substring match.
    Contains,
    /// Prefix match.
    StartsWith,
    /// Suffix match.
    EndsWith,
    /// Regular-expression match (compiled at load).
    Regex,
}

/// One condition over a triple field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted triple predicate, e.g. `robotics.battery.level`.
    pub field: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Comparison operand(s).
    pub value: serde_json::Value,
    /// Whether a missing field fails the condition (`true`, the default) or
    /// the condition is skipped (`false`).
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Which entities and buckets a rule watches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySelector {
    /// Six-segment glob over the entity ID, `*` per segment.
    pub pattern: String,
    /// Buckets to watch; defaults to the engine's configured buckets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_buckets: Option<Vec<String>>,
}

/// A declarative rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule ID.
    pub id: String,
    /// Rule type, resolved through the action registry.
    #[serde(rename = "type")]
    pub rule_type: String,
    /// Whether the rule is active.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Entity selector.
    pub entity: EntitySelector,
    /// Conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Condition combination logic.
    #[serde(default)]
    pub logic: Logic,
    /// Cooldown between firings per (rule, entity), e.g. `"5m"`.
    pub cooldown: String,
    /// Action-specific metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

/// A rule with its cooldown parsed and regexes compiled.
pub struct CompiledRule {
    /// The source definition.
    pub rule: Rule,
    /// Parsed cooldown.
    pub cooldown: Duration,
    /// Compiled regex per condition index (regex operator only).
    pub regexes: Vec<Option<regex::Regex>>,
}

impl CompiledRule {
    /// Validate and compile a rule.
    ///
    /// # Errors
    ///
    /// [`RuleError::InvalidRule`], [`RuleError::InvalidRegex`] or
    /// [`RuleError::InvalidDuration`].
    pub fn compile(rule: Rule) -> Result<Self, RuleError> {
        if rule.id.is_empty() {
            return Err(RuleError::InvalidRule {
                rule: rule.id.clone(),
                reason: "empty id".into(),
            });
        }
        if rule.entity.pattern.split('.').count() != 6 {
            return Err(RuleError::InvalidRule {
                rule: rule.id.clone(),
                reason: format!(
                    "entity pattern {:?} must have six segments",
                    rule.entity.pattern
                ),
            });
        }

        let cooldown = parse_duration(&rule.cooldown)?;
        let mut regexes = Vec::with_capacity(rule.conditions.len());
        for condition in &rule.conditions {
            match condition.operator {
                Operator::Regex => {
                    let pattern = condition.value.as_str().ok_or_else(|| RuleError::InvalidRule {
                        rule: rule.id.clone(),
                        reason: "regex operator requires a string value".into(),
                    })?;
                    let compiled =
                        regex::Regex::new(pattern).map_err(|source| RuleError::InvalidRegex {
                            rule: rule.id.clone(),
                            source,
                        })?;
                    regexes.push(Some(compiled));
                }
                Operator::Between => {
                    let ok = condition
                        .value
                        .as_array()
                        .is_some_and(|a| a.len() == 2 && a.iter().all(serde_json::Value::is_number));
                    if !ok {
                        return Err(RuleError::InvalidRule {
                            rule: rule.id.clone(),
                            reason: "between requires a two-element numeric array".into(),
                        });
                    }
                    regexes.push(None);
                }
                Operator::In | Operator::NotIn => {
                    if !condition.value.is_array() {
                        return Err(RuleError::InvalidRule {
                            rule: rule.id.clone(),
                            reason: "in/not_in require an array value".into(),
                        });
                    }
                    regexes.push(None);
                }
                _ => regexes.push(None),
            }
        }

        Ok(Self {
            rule,
            cooldown,
            regexes,
        })
    }
}

/// Parse `"500ms"`, `"30s"`, `"5m"`, `"2h"` or `"1d"` into a duration.
///
/// # Errors
///
/// [`RuleError::InvalidDuration`] on anything else.
pub fn parse_duration(raw: &str) -> Result<Duration, RuleError> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| RuleError::InvalidDuration(raw.to_string()))?;
    let (number, unit) = raw.split_at(split);
    let number: u64 = number
        .parse()
        .map_err(|_| RuleError::InvalidDuration(raw.to_string()))?;
    let duration = match unit {
        "ms" => Duration::from_millis(number),
        "s" => Duration::from_secs(number),
        "m" => Duration::from_secs(number * 60),
        "h" => Duration::from_secs(number * 3_600),
        "d" => Duration::from_secs(number * 86_400),
        _ => return Err(RuleError::InvalidDuration(raw.to_string())),
    };
    Ok(duration)
}
