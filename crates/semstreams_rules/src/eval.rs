//! Condition evaluation against an entity's current triples.

use semstreams_msg::{EntityState, TripleObject};

use crate::rule::{CompiledRule, Condition, Logic, Operator};

/// Evaluate a compiled rule against entity state.
///
/// Walks the entity's current triples: for each condition, the last-written
/// assertion of `field` supplies the operand. A missing required field fails
/// the condition; a missing optional field skips it. The declared logic
/// combines the evaluated conditions; a rule with nothing evaluated does not
/// match.
#[must_use]
pub fn evaluate(compiled: &CompiledRule, state: &EntityState) -> bool {
    let mut evaluated = Vec::with_capacity(compiled.rule.conditions.len());
    for (index, condition) in compiled.rule.conditions.iter().enumerate() {
        match state.current(&condition.field) {
            Some(triple) => {
                evaluated.push(check(condition, &triple.object, compiled.regexes[index].as_ref()));
            }
            None if condition.required => evaluated.push(false),
            None => {}
        }
    }
    if evaluated.is_empty() {
        return false;
    }
    match compiled.rule.logic {
        Logic::And => evaluated.iter().all(|b| *b),
        Logic::Or => evaluated.iter().any(|b| *b),
    }
}

fn check(condition: &Condition, object: &TripleObject, regex: Option<&regex::Regex>) -> bool {
    match condition.operator {
        Operator::Eq => equals(object, &condition.value),
        Operator::Ne => !equals(object, &condition.value),
        Operator::Lt => numeric(object, &condition.value, |a, b| a < b),
        Operator::Lte => numeric(object, &condition.value, |a, b| a <= b),
        Operator::Gt => numeric(object, &condition.value, |a, b| a > b),
        Operator::Gte => numeric(object, &condition.value, |a, b| a >= b),
        Operator::Between => {
            let Some(bounds) = condition.value.as_array() else {
                return false;
            };
            let (Some(lo), Some(hi)) = (
                bounds.first().and_then(serde_json::Value::as_f64),
                bounds.get(1).and_then(serde_json::Value::as_f64),
            ) else {
                return false;
            };
            object.as_number().is_some_and(|n| n >= lo && n <= hi)
        }
        Operator::In => in_list(object, &condition.value),
        Operator::NotIn => !in_list(object, &condition.value),
        Operator::Contains => text(object, &condition.value, |s, v| s.contains(v)),
        Operator::StartsWith => text(object, &condition.value, |s, v| s.starts_with(v)),
        Operator::EndsWith => text(object, &condition.value, |s, v| s.ends_with(v)),
        Operator::Regex => regex
            .zip(object.as_text())
            .is_some_and(|(re, s)| re.is_match(s)),
    }
}

fn equals(object: &TripleObject, value: &serde_json::Value) -> bool {
    match (object, value) {
        (TripleObject::Number(n), serde_json::Value::Number(v)) => {
            v.as_f64().is_some_and(|v| (n - v).abs() < f64::EPSILON)
        }
        (TripleObject::Bool(b), serde_json::Value::Bool(v)) => b == v,
        (object, serde_json::Value::String(v)) => object.as_text() == Some(v.as_str()),
        _ => false,
    }
}

/// Numeric comparisons require numeric operands on both sides.
fn numeric(object: &TripleObject, value: &serde_json::Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (object.as_number(), value.as_f64()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn text(object: &TripleObject, value: &serde_json::Value, op: impl Fn(&str, &str) -> bool) -> bool {
    match (object.as_text(), value.as_str()) {
        (Some(s), Some(v)) => op(s, v),
        _ => false,
    }
}

fn in_list(object: &TripleObject, value: &serde_json::Value) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().any(|item| equals(object, item)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Rule;
    use semstreams_msg::{EntityId, Triple, VocabularyRegistry};

    fn drone() -> EntityId {
        EntityId::parse("acme.plat1.robotics.gcs1.drone.001").unwrap()
    }

    fn state_with(predicate: &str, object: TripleObject) -> EntityState {
        let registry = VocabularyRegistry::with_defaults();
        let mut state = EntityState::new(drone(), "drone");
        state.merge(
            vec![Triple::new(drone(), predicate, object, "test")],
            &registry.snapshot(),
        );
        state
    }

    fn compiled(conditions: serde_json::Value, logic: &str) -> CompiledRule {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "id": "test-rule",
            "type": "alert",
            "entity": {"pattern": "*.*.*.*.*.*"},
            "conditions": conditions,
            "logic": logic,
            "cooldown": "1s"
        }))
        .unwrap();
        CompiledRule::compile(rule).unwrap()
    }

    #[test]
    fn test_numeric_operators() {
        let state = state_with("robotics.battery.level", TripleObject::Number(15.4));
        let lte = compiled(
            serde_json::json!([{"field": "robotics.battery.level", "operator": "lte", "value": 20}]),
            "and",
        );
        assert!(evaluate(&lte, &state));

        let gt = compiled(
            serde_json::json!([{"field": "robotics.battery.level", "operator": "gt", "value": 20}]),
            "and",
        );
        assert!(!evaluate(&gt, &state));
    }

    #[test]
    fn test_numeric_requires_numeric_operand() {
        let state = state_with("identifier.callsign", TripleObject::Text("ALPHA-1".into()));
        let rule = compiled(
            serde_json::json!([{"field": "identifier.callsign", "operator": "lt", "value": 20}]),
            "and",
        );
        assert!(!evaluate(&rule, &state), "string vs number never matches");
    }

    #[test]
    fn test_between_inclusive() {
        let state = state_with("robotics.battery.level", TripleObject::Number(20.0));
        let rule = compiled(
            serde_json::json!([{"field": "robotics.battery.level", "operator": "between", "value": [10, 20]}]),
            "and",
        );
        assert!(evaluate(&rule, &state), "between is inclusive");
    }

    #[test]
    fn test_string_operators() {
        let state = state_with("identifier.callsign", TripleObject::Text("ALPHA-1".into()));
        let starts = compiled(
            serde_json::json!([{"field": "identifier.callsign", "operator": "starts_with", "value": "ALPHA"}]),
            "and",
        );
        assert!(evaluate(&starts, &state));

        let contains = compiled(
            serde_json::json!([{"field": "identifier.callsign", "operator": "contains", "value": "PHA-"}]),
            "and",
        );
        assert!(evaluate(&contains, &state));

        let regex = compiled(
            serde_json::json!([{"field": "identifier.callsign", "operator": "regex", "value": "^ALPHA-\\d$"}]),
            "and",
        );
        assert!(evaluate(&regex, &state));
    }

    #[test]
    fn test_in_and_not_in() {
        let state = state_with("identifier.callsign", TripleObject::Text("ALPHA-1".into()));
        let in_rule = compiled(
            serde_json::json!([{"field": "identifier.callsign", "operator": "in", "value": ["ALPHA-1", "BRAVO-2"]}]),
            "and",
        );
        assert!(evaluate(&in_rule, &state));

        let not_in = compiled(
            serde_json::json!([{"field": "identifier.callsign", "operator": "not_in", "value": ["BRAVO-2"]}]),
            "and",
        );
        assert!(evaluate(&not_in, &state));
    }

    #[test]
    fn test_missing_required_field_fails() {
        let state = state_with("robotics.battery.level", TripleObject::Number(15.0));
        let rule = compiled(
            serde_json::json!([{"field": "weather.wind.speed", "operator": "gt", "value": 10}]),
            "and",
        );
        assert!(!evaluate(&rule, &state));
    }

    #[test]
    fn test_missing_optional_field_skipped() {
        let state = state_with("robotics.battery.level", TripleObject::Number(15.0));
        let rule = compiled(
            serde_json::json!([
                {"field": "robotics.battery.level", "operator": "lte", "value": 20},
                {"field": "weather.wind.speed", "operator": "gt", "value": 10, "required": false}
            ]),
            "and",
        );
        assert!(evaluate(&rule, &state), "optional missing condition is skipped");
    }

    #[test]
    fn test_or_logic() {
        let state = state_with("robotics.battery.level", TripleObject::Number(50.0));
        let rule = compiled(
            serde_json::json!([
                {"field": "robotics.battery.level", "operator": "lte", "value": 20},
                {"field": "robotics.battery.level", "operator": "gte", "value": 40}
            ]),
            "or",
        );
        assert!(evaluate(&rule, &state));
    }
}
