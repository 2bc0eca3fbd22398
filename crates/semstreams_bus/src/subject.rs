//! Subject grammar and wildcard matching.
//!
//! Subjects are dotted token strings (`events.graph.entity.drone`). Patterns
//! may use `*` to match exactly one token and `>` to match one or more
//! trailing tokens. `>` is only legal as the final token.

use crate::error::BusError;

/// Prefix used for request/reply inbox subjects.
pub const INBOX_PREFIX: &str = "_INBOX.";

/// Subject for component error events consumed by the message logger.
/// Errors are never re-published as exceptions; they become metrics plus an
/// event here.
pub const ERRORS: &str = "events.errors";

/// Validate a concrete subject (no wildcards).
///
/// # Errors
///
/// Returns [`BusError::InvalidSubject`] for empty subjects, empty tokens or
/// wildcard tokens.
pub fn validate_subject(subject: &str) -> Result<(), BusError> {
    if subject.is_empty() {
        return Err(BusError::InvalidSubject(subject.into(), "empty subject"));
    }
    for token in subject.split('.') {
        if token.is_empty() {
            return Err(BusError::InvalidSubject(subject.into(), "empty token"));
        }
        if token == "*" || token == ">" {
            return Err(BusError::InvalidSubject(
                subject.into(),
                "wildcards not allowed in a publish subject",
            ));
        }
    }
    Ok(())
}

/// Validate a subscription pattern (wildcards allowed).
///
/// # Errors
///
/// Returns [`BusError::InvalidSubject`] for empty tokens or a `>` that is
/// not in tail position.
pub fn validate_pattern(pattern: &str) -> Result<(), BusError> {
    if pattern.is_empty() {
        return Err(BusError::InvalidSubject(pattern.into(), "empty pattern"));
    }
    let tokens: Vec<&str> = pattern.split('.').collect();
    for (i, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            return Err(BusError::InvalidSubject(pattern.into(), "empty token"));
        }
        if *token == ">" && i + 1 != tokens.len() {
            return Err(BusError::InvalidSubject(
                pattern.into(),
                "'>' must be the final token",
            ));
        }
    }
    Ok(())
}

/// Match a concrete subject against a pattern.
///
/// `a.*` matches `a.x` and `a.y` but not `a.x.y`; `a.>` matches both.
#[must_use]
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some(">"), None) => return false,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (Some(_), Some(_)) => return false,
            (None, None) => return true,
            (None, Some(_)) | (Some(_), None) => return false,
        }
    }
}

/// Returns `true` if two patterns can deliver the same subject — used by the
/// flow runtime to detect conflicting output bindings.
#[must_use]
pub fn overlaps(a: &str, b: &str) -> bool {
    let a_tokens: Vec<&str> = a.split('.').collect();
    let b_tokens: Vec<&str> = b.split('.').collect();
    overlap_tokens(&a_tokens, &b_tokens)
}

fn overlap_tokens(a: &[&str], b: &[&str]) -> bool {
    match (a.first(), b.first()) {
        (Some(&">"), _) | (_, Some(&">")) => true,
        (Some(&x), Some(&y)) if x == "*" || y == "*" || x == y => {
            overlap_tokens(&a[1..], &b[1..])
        }
        (None, None) => true,
        _ => false,
    }
}

/// Build a unique inbox subject for request/reply.
#[must_use]
pub fn new_inbox() -> String {
    format!("{INBOX_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches("a.b.c", "a.b.c"));
        assert!(!matches("a.b.c", "a.b.d"));
        assert!(!matches("a.b.c", "a.b"));
    }

    #[test]
    fn test_star_matches_one_token() {
        assert!(matches("a.*", "a.x"));
        assert!(matches("a.*", "a.y"));
        assert!(!matches("a.*", "a.x.y"));
        assert!(!matches("a.*", "a"));
    }

    #[test]
    fn test_tail_matches_remainder() {
        assert!(matches("a.>", "a.x"));
        assert!(matches("a.>", "a.x.y"));
        assert!(!matches("a.>", "a"));
        assert!(matches(">", "anything.at.all"));
    }

    #[test]
    fn test_star_in_middle() {
        assert!(matches("events.*.entity.drone", "events.graph.entity.drone"));
        assert!(!matches("events.*.entity.drone", "events.graph.entity.ship"));
    }

    #[test]
    fn test_pattern_validation() {
        assert!(validate_pattern("a.*.c").is_ok());
        assert!(validate_pattern("a.>").is_ok());
        assert!(validate_pattern("a.>.c").is_err(), "'>' must be last");
        assert!(validate_pattern("a..c").is_err());
        assert!(validate_subject("a.*").is_err(), "publish subjects are concrete");
    }

    #[test]
    fn test_overlap_detection() {
        assert!(overlaps("a.b", "a.*"));
        assert!(overlaps("a.>", "a.b.c"));
        assert!(overlaps("*.b", "a.*"));
        assert!(!overlaps("a.b", "a.c"));
        assert!(!overlaps("a.b", "a.b.c"));
    }

    #[test]
    fn test_inbox_subjects_unique() {
        assert_ne!(new_inbox(), new_inbox());
        assert!(new_inbox().starts_with(INBOX_PREFIX));
    }
}
