// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// What a matched rule does with the tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Allow,
    Deny,
    Ask,
}

/// Answer to an interactive permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Deny,
}

/// Answer to a plan approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanDecision {
    Confirm,
    Reject,
}

/// One entry of the permission rule list.  Rules are scanned in order;
/// the first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Tool name, or `"*"` to match any tool.
    pub tool: String,
    /// Optional regex applied to the JSON-stringified tool input.
    /// Compiled and validated when the policy is built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub action: PermissionAction,
}

impl PermissionRule {
    pub fn new(tool: impl Into<String>, action: PermissionAction) -> Self {
        Self {
            tool: tool.into(),
            pattern: None,
            action,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn matches_tool(&self, tool: &str) -> bool {
        self.tool == "*" || self.tool == tool
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_any_tool() {
        let r = PermissionRule::new("*", PermissionAction::Deny);
        assert!(r.matches_tool("bash"));
        assert!(r.matches_tool("read_file"));
    }

    #[test]
    fn named_rule_matches_exactly() {
        let r = PermissionRule::new("bash", PermissionAction::Ask);
        assert!(r.matches_tool("bash"));
        assert!(!r.matches_tool("bash2"));
    }

    #[test]
    fn action_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PermissionAction::Ask).unwrap(),
            r#""ask""#
        );
    }
}
