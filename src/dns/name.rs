//! Domain name canonicalization and validation (spec §3 "name is case-insensitive
//! and canonicalized by lowercasing and trailing-dot removal").

/// Lowercase, strip a trailing dot, and trim whitespace — the canonical form
/// used as cache keys, rule/host pattern match input, and mark lookups.
pub fn canonicalize(name: &str) -> String {
    let trimmed = name.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    trimmed.to_ascii_lowercase()
}

/// Validate a host-override pattern or plain domain per spec §3:
/// `*.`-prefixed wildcard allowed, overall length <= 253 bytes, each label
/// <= 63 bytes of `[A-Za-z0-9-]` with no leading/trailing hyphen.
pub fn is_valid_domain_or_wildcard(pattern: &str) -> bool {
    let name = canonicalize(pattern);
    if name.is_empty() || name == "*" {
        return true;
    }
    let name = name.strip_prefix("*.").unwrap_or(&name);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(is_valid_label)
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > 63 {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    label
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// `matchDomainPattern` from spec §4.4 / §4.6 / §8: first-match-wins pattern
/// matching shared by the host-override resolver and the rule store.
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    let pattern = canonicalize(pattern);
    let name = canonicalize(name);

    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return name == suffix || name.ends_with(&format!(".{suffix}"));
    }
    pattern == name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_case_and_trailing_dot() {
        assert_eq!(canonicalize("Example.COM."), "example.com");
        assert_eq!(canonicalize("  example.com  "), "example.com");
    }

    #[test]
    fn wildcard_pattern_matches_suffix_and_exact() {
        assert!(matches_pattern("*.x", "x"));
        assert!(matches_pattern("*.x", "y.x"));
        assert!(!matches_pattern("*.x", "yx"));
        assert!(matches_pattern("*.X", "Y.x"));
    }

    #[test]
    fn exact_pattern_requires_equality() {
        assert!(matches_pattern("example.com", "example.com"));
        assert!(!matches_pattern("example.com", "sub.example.com"));
    }

    #[test]
    fn empty_and_star_match_anything() {
        assert!(matches_pattern("", "anything.test"));
        assert!(matches_pattern("*", "anything.test"));
    }

    #[test]
    fn domain_validation_rejects_bad_labels() {
        assert!(is_valid_domain_or_wildcard("api.internal"));
        assert!(is_valid_domain_or_wildcard("*.internal"));
        assert!(!is_valid_domain_or_wildcard("-bad.internal"));
        assert!(!is_valid_domain_or_wildcard("bad-.internal"));
        assert!(!is_valid_domain_or_wildcard(&"a".repeat(64)));
    }
}
