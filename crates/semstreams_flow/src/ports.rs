//! Port bindings and subject templating.
//!
//! An output port subject may contain `{field}` placeholders resolved
//! against payload fields at publish time (e.g.
//! `events.graph.entity.{entity_type}`). A message whose payload lacks the
//! field is dropped with a recorded error, never published half-resolved.

use crate::config::{PortSpec, PortType};
use crate::error::FlowError;

/// A resolved port: name plus the subject it is bound to.
#[derive(Debug, Clone)]
pub struct PortBinding {
    /// Port name within the component.
    pub name: String,
    /// Subject or subject template.
    pub subject: String,
    /// Transport binding.
    pub port_type: PortType,
    /// Declared message interface.
    pub interface: Option<String>,
}

impl From<&PortSpec> for PortBinding {
    fn from(spec: &PortSpec) -> Self {
        Self {
            name: spec.name.clone(),
            subject: spec.subject.clone(),
            port_type: spec.port_type,
            interface: spec.interface.clone(),
        }
    }
}

/// Returns `true` if the subject contains `{field}` placeholders.
#[must_use]
pub fn is_template(subject: &str) -> bool {
    subject.contains('{')
}

/// Resolve `{field}` placeholders against a payload.
///
/// Field values render as their JSON string form without quotes; nested
/// fields are addressed with dots (`position.lat`).
///
/// # Errors
///
/// Returns [`FlowError::MissingTemplateField`] if any placeholder has no
/// usable value.
pub fn resolve_subject(template: &str, payload: &serde_json::Value) -> Result<String, FlowError> {
    if !is_template(template) {
        return Ok(template.to_string());
    }

    let mut resolved = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        resolved.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return Err(FlowError::MissingTemplateField {
                field: after.to_string(),
                subject: template.to_string(),
            });
        };
        let field = &after[..close];
        let value = lookup(payload, field).ok_or_else(|| FlowError::MissingTemplateField {
            field: field.to_string(),
            subject: template.to_string(),
        })?;
        resolved.push_str(&value);
        rest = &after[close + 1..];
    }
    resolved.push_str(rest);
    Ok(resolved)
}

/// Look up a dotted field and render it as a subject token.
fn lookup(payload: &serde_json::Value, field: &str) -> Option<String> {
    let mut current = payload;
    for part in field.split('.') {
        current = current.get(part)?;
    }
    match current {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
