//! Model mapping rules
//!
//! Operators can rewrite a client-requested model name to a different
//! upstream model via glob rules, e.g. mapping every `gpt-4*` request onto
//! a specific upstream model id. Rules are evaluated in `(priority asc,
//! created_at asc)` order; the first pattern match wins. No rule matching
//! means the requested model passes through unchanged.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMapping {
    pub pattern: String,
    pub target: String,
    #[serde(default)]
    pub priority: i32,
    pub created_at: u64,
}

/// Resolve `requested_model` against `mappings`, returning the mapped
/// target or the original model name if nothing matches.
pub fn resolve_model<'a>(requested_model: &'a str, mappings: &'a [ModelMapping]) -> &'a str {
    let mut ordered: Vec<&ModelMapping> = mappings.iter().collect();
    ordered.sort_by_key(|m| (m.priority, m.created_at));

    for mapping in ordered {
        if glob_match::glob_match(&mapping.pattern, requested_model) {
            return &mapping.target;
        }
    }
    requested_model
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pattern: &str, target: &str, priority: i32, created_at: u64) -> ModelMapping {
        ModelMapping {
            pattern: pattern.into(),
            target: target.into(),
            priority,
            created_at,
        }
    }

    #[test]
    fn exact_match_wins() {
        let mappings = vec![mapping("gpt-4o", "upstream-pro", 0, 0)];
        assert_eq!(resolve_model("gpt-4o", &mappings), "upstream-pro");
    }

    #[test]
    fn glob_pattern_matches() {
        let mappings = vec![mapping("gpt-4*", "upstream-pro", 0, 0)];
        assert_eq!(resolve_model("gpt-4-turbo", &mappings), "upstream-pro");
    }

    #[test]
    fn no_match_passes_through() {
        let mappings = vec![mapping("claude-*", "upstream-pro", 0, 0)];
        assert_eq!(resolve_model("gpt-4o", &mappings), "gpt-4o");
    }

    #[test]
    fn lower_priority_wins_first() {
        let mappings = vec![
            mapping("gpt-4*", "low-priority-target", 5, 0),
            mapping("gpt-4*", "high-priority-target", 0, 0),
        ];
        assert_eq!(resolve_model("gpt-4o", &mappings), "high-priority-target");
    }

    #[test]
    fn equal_priority_earlier_created_at_wins_first() {
        let mappings = vec![
            mapping("gpt-4*", "newer", 0, 100),
            mapping("gpt-4*", "older", 0, 10),
        ];
        assert_eq!(resolve_model("gpt-4o", &mappings), "older");
    }
}
