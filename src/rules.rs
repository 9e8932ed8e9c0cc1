//! Rule store (spec §3/§4.6): domain pattern → egress interface, first
//! pattern whose `matchDomainPattern` succeeds wins, insertion order
//! preserved, concurrent-safe upsert/delete/lookup.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::dns::name::{canonicalize, matches_pattern};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub pattern: String,
    pub via: String,
    #[serde(default)]
    pub pin_ttl: bool,
}

/// A named collection of patterns sharing one egress interface, as accepted
/// by the config's `rule_groups[]` (spec §6.3) before being flattened.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    pub via: String,
    pub patterns: Vec<String>,
    #[serde(default)]
    pub pin_ttl: bool,
}

pub fn flatten_groups(groups: &[RuleGroup]) -> Vec<Rule> {
    groups
        .iter()
        .flat_map(|group| {
            group.patterns.iter().map(|pattern| Rule {
                pattern: pattern.clone(),
                via: group.via.clone(),
                pin_ttl: group.pin_ttl,
            })
        })
        .collect()
}

#[derive(Default)]
pub struct RuleStore {
    rules: RwLock<Vec<Rule>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<Rule> {
        self.rules.read().clone()
    }

    /// Replaces an existing entry with the same pattern, otherwise appends
    /// (preserving insertion order for everything else).
    pub fn upsert(&self, rule: Rule) {
        let mut rules = self.rules.write();
        if let Some(existing) = rules.iter_mut().find(|r| r.pattern == rule.pattern) {
            *existing = rule;
        } else {
            rules.push(rule);
        }
    }

    pub fn delete(&self, pattern: &str) {
        self.rules.write().retain(|r| r.pattern != pattern);
    }

    /// Wholesale replacement, used when the rule groups are reloaded from
    /// config (spec §4.8 hot reload) rather than edited one pattern at a
    /// time via `upsert`/`delete`.
    pub fn replace_all(&self, rules: Vec<Rule>) {
        *self.rules.write() = rules;
    }

    pub fn find(&self, host: &str) -> Option<Rule> {
        let name = canonicalize(host);
        self.rules
            .read()
            .iter()
            .find(|r| matches_pattern(&r.pattern, &name))
            .cloned()
    }

    pub fn find_iface(&self, host: &str) -> Option<String> {
        self.find(host).map(|r| r.via)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_pattern_wins() {
        let store = RuleStore::new();
        store.upsert(Rule {
            pattern: "*.example".into(),
            via: "wg0".into(),
            pin_ttl: false,
        });
        store.upsert(Rule {
            pattern: "a.example".into(),
            via: "wg1".into(),
            pin_ttl: false,
        });
        // "*.example" was inserted first, so it wins even though
        // "a.example" also matches.
        assert_eq!(store.find_iface("a.example"), Some("wg0".into()));
    }

    #[test]
    fn upsert_replaces_same_pattern_in_place() {
        let store = RuleStore::new();
        store.upsert(Rule {
            pattern: "a.example".into(),
            via: "wg0".into(),
            pin_ttl: false,
        });
        store.upsert(Rule {
            pattern: "a.example".into(),
            via: "wg1".into(),
            pin_ttl: true,
        });
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.find_iface("a.example"), Some("wg1".into()));
    }

    #[test]
    fn delete_removes_matching_pattern() {
        let store = RuleStore::new();
        store.upsert(Rule {
            pattern: "a.example".into(),
            via: "wg0".into(),
            pin_ttl: false,
        });
        store.delete("a.example");
        assert!(store.find("a.example").is_none());
    }
}
