//! Key sanitisation shared by the predicate and alias indexes.

/// Maximum sanitised key length in bytes.
pub const MAX_KEY_LEN: usize = 255;

/// Sanitise a predicate or alias value into an index key: lowercase,
/// whitespace and separators become `_`, anything outside `[a-z0-9._]` is
/// stripped, truncated to 255 bytes.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        match c {
            'a'..='z' | '0'..='9' | '.' | '_' => out.push(c),
            ' ' | '\t' | '\n' | '-' | '/' | ':' | '|' | ',' | ';' => out.push('_'),
            _ => {}
        }
        if out.len() >= MAX_KEY_LEN {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases() {
        assert_eq!(sanitize("Robotics.Battery.Level"), "robotics.battery.level");
    }

    #[test]
    fn test_separators_become_underscores() {
        assert_eq!(sanitize("ALPHA-1"), "alpha_1");
        assert_eq!(sanitize("alpha 1"), "alpha_1");
        assert_eq!(sanitize("a/b:c"), "a_b_c");
    }

    #[test]
    fn test_strips_exotic_characters() {
        assert_eq!(sanitize("naïve™predicate"), "navepredicate");
    }

    #[test]
    fn test_truncates() {
        let long = "x".repeat(1000);
        assert_eq!(sanitize(&long).len(), MAX_KEY_LEN);
    }
}
