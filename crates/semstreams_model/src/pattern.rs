//! Dotted glob patterns.
//!
//! Type filters (`telemetry.*.*`), rule entity patterns and subject matching
//! all use the same token grammar: `*` matches exactly one dotted token and
//! `>` matches one or more trailing tokens.

use serde::{Deserialize, Serialize};

/// A compiled dotted glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DottedPattern {
    raw: String,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Single,
    Tail,
}

impl DottedPattern {
    /// Compile a pattern. Patterns are never rejected; a `>` anywhere but the
    /// last position is treated as a literal token.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let parts: Vec<&str> = pattern.split('.').collect();
        let last = parts.len().saturating_sub(1);
        let tokens = parts
            .iter()
            .enumerate()
            .map(|(i, part)| match *part {
                "*" => Token::Single,
                ">" if i == last => Token::Tail,
                other => Token::Literal(other.to_string()),
            })
            .collect();
        Self {
            raw: pattern.to_string(),
            tokens,
        }
    }

    /// The original pattern text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a dotted subject against this pattern.
    #[must_use]
    pub fn matches(&self, subject: &str) -> bool {
        let parts: Vec<&str> = subject.split('.').collect();
        let mut i = 0;
        for token in &self.tokens {
            match token {
                Token::Tail => return i < parts.len(),
                Token::Single => {
                    if i >= parts.len() {
                        return false;
                    }
                    i += 1;
                }
                Token::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return false;
                    }
                    i += 1;
                }
            }
        }
        i == parts.len()
    }
}

impl From<String> for DottedPattern {
    fn from(s: String) -> Self {
        DottedPattern::new(&s)
    }
}

impl From<DottedPattern> for String {
    fn from(p: DottedPattern) -> Self {
        p.raw
    }
}

/// Match a subject against a pattern without pre-compiling.
#[must_use]
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    DottedPattern::new(pattern).matches(subject)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        let p = DottedPattern::new("events.graph.entity.upsert");
        assert!(p.matches("events.graph.entity.upsert"));
        assert!(!p.matches("events.graph.entity.delete"));
    }

    #[test]
    fn test_single_token_wildcard() {
        let p = DottedPattern::new("events.graph.entity.*");
        assert!(p.matches("events.graph.entity.upsert"));
        assert!(p.matches("events.graph.entity.telemetry"));
        assert!(!p.matches("events.graph.entity"));
        assert!(!p.matches("events.graph.entity.upsert.extra"));
    }

    #[test]
    fn test_tail_wildcard() {
        let p = DottedPattern::new("graph.>");
        assert!(p.matches("graph.entity.get"));
        assert!(p.matches("graph.query.path"));
        assert!(!p.matches("graph"));
        assert!(!p.matches("events.graph.entity"));
    }

    #[test]
    fn test_type_pattern() {
        let p = DottedPattern::new("telemetry.*.*");
        assert!(p.matches("telemetry.drone.position"));
        assert!(!p.matches("alerts.battery.critical"));
        assert!(!p.matches("telemetry.drone"));
    }

    #[test]
    fn test_interior_gt_is_literal() {
        let p = DottedPattern::new("a.>.b");
        assert!(p.matches("a.>.b"));
        assert!(!p.matches("a.x.b"));
    }
}
