// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::RwLock;

use anyhow::Context;
use regex::Regex;
use serde_json::Value;

use gent_types::{PermissionAction, PermissionRule};

struct CompiledRule {
    rule: PermissionRule,
    pattern: Option<Regex>,
}

/// Ordered first-match rule engine deciding what happens to a tool call.
///
/// The rule list is scanned in order; the first rule whose tool matches and
/// whose pattern (if any) matches the JSON-stringified input determines the
/// outcome.  When no rule matches, the default depends on the session:
/// bypass sessions allow, otherwise read-only tools allow and everything
/// else asks.
///
/// Interactive approvals with `persist = true` append allow rules at the
/// front so they win over a later broad `ask` rule; writes are serialised
/// through the interior lock.
pub struct PermissionPolicy {
    rules: RwLock<Vec<CompiledRule>>,
}

impl PermissionPolicy {
    /// Build a policy, validating every rule pattern.  An invalid regex is
    /// a configuration error, not something to discover at call time.
    pub fn new(rules: Vec<PermissionRule>) -> anyhow::Result<Self> {
        let compiled = rules
            .into_iter()
            .map(compile)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            rules: RwLock::new(compiled),
        })
    }

    pub fn empty() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
        }
    }

    /// First matching rule's action, or `None` when no rule matches.
    pub fn resolve(&self, tool: &str, input: &Value) -> Option<PermissionAction> {
        let input_str = input.to_string();
        let rules = self.rules.read().unwrap();
        rules
            .iter()
            .find(|c| {
                c.rule.matches_tool(tool)
                    && c.pattern.as_ref().map_or(true, |re| re.is_match(&input_str))
            })
            .map(|c| c.rule.action)
    }

    /// Full decision including the session default.
    pub fn check(
        &self,
        tool: &str,
        input: &Value,
        read_only: bool,
        bypass: bool,
    ) -> PermissionAction {
        if let Some(action) = self.resolve(tool, input) {
            return action;
        }
        if bypass || read_only {
            PermissionAction::Allow
        } else {
            PermissionAction::Ask
        }
    }

    /// Append a persisted allow rule from an interactive approval.  Without
    /// an explicit pattern the whole tool is allow-listed.
    pub fn append_allow(&self, tool: &str, pattern: Option<String>) -> anyhow::Result<()> {
        let mut rule = PermissionRule::new(tool, PermissionAction::Allow);
        if let Some(p) = pattern {
            rule = rule.with_pattern(p);
        }
        let compiled = compile(rule)?;
        self.rules.write().unwrap().insert(0, compiled);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<PermissionRule> {
        self.rules
            .read()
            .unwrap()
            .iter()
            .map(|c| c.rule.clone())
            .collect()
    }
}

fn compile(rule: PermissionRule) -> anyhow::Result<CompiledRule> {
    let pattern = rule
        .pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .with_context(|| format!("invalid permission pattern for tool '{}'", rule.tool))?;
    Ok(CompiledRule { rule, pattern })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rules(list: &[(&str, Option<&str>, PermissionAction)]) -> PermissionPolicy {
        PermissionPolicy::new(
            list.iter()
                .map(|(tool, pattern, action)| PermissionRule {
                    tool: tool.to_string(),
                    pattern: pattern.map(str::to_string),
                    action: *action,
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn first_matching_rule_wins() {
        let p = rules(&[
            ("bash", None, PermissionAction::Deny),
            ("bash", None, PermissionAction::Allow),
        ]);
        assert_eq!(
            p.resolve("bash", &json!({"command": "ls"})),
            Some(PermissionAction::Deny)
        );
    }

    #[test]
    fn pattern_is_matched_against_stringified_input() {
        let p = rules(&[("bash", Some("rm -rf"), PermissionAction::Deny)]);
        assert_eq!(
            p.resolve("bash", &json!({"command": "rm -rf /"})),
            Some(PermissionAction::Deny)
        );
        assert_eq!(p.resolve("bash", &json!({"command": "ls"})), None);
    }

    #[test]
    fn wildcard_rule_applies_to_all_tools() {
        let p = rules(&[("*", None, PermissionAction::Deny)]);
        assert_eq!(
            p.resolve("web_fetch", &json!({})),
            Some(PermissionAction::Deny)
        );
    }

    #[test]
    fn default_asks_for_effectful_tools() {
        let p = PermissionPolicy::empty();
        assert_eq!(
            p.check("bash", &json!({}), false, false),
            PermissionAction::Ask
        );
    }

    #[test]
    fn default_allows_read_only_tools() {
        let p = PermissionPolicy::empty();
        assert_eq!(
            p.check("read_file", &json!({}), true, false),
            PermissionAction::Allow
        );
    }

    #[test]
    fn bypass_flips_default_but_not_explicit_deny() {
        let p = rules(&[("bash", None, PermissionAction::Deny)]);
        assert_eq!(
            p.check("bash", &json!({}), false, true),
            PermissionAction::Deny
        );
        assert_eq!(
            p.check("write_file", &json!({}), false, true),
            PermissionAction::Allow
        );
    }

    #[test]
    fn check_is_deterministic_for_same_input() {
        let p = rules(&[("bash", Some("^.*git.*$"), PermissionAction::Allow)]);
        let input = json!({"command": "git status"});
        let first = p.check("bash", &input, false, false);
        for _ in 0..10 {
            assert_eq!(p.check("bash", &input, false, false), first);
        }
    }

    #[test]
    fn append_allow_wins_over_later_ask_rule() {
        let p = rules(&[("bash", None, PermissionAction::Ask)]);
        p.append_allow("bash", None).unwrap();
        assert_eq!(
            p.resolve("bash", &json!({"command": "make"})),
            Some(PermissionAction::Allow)
        );
    }

    #[test]
    fn invalid_pattern_is_rejected_at_construction() {
        let result = PermissionPolicy::new(vec![PermissionRule::new(
            "bash",
            PermissionAction::Deny,
        )
        .with_pattern("([unclosed")]);
        assert!(result.is_err());
    }
}
