// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// A named role: a system-prompt addendum, an allowed-tool set, a delegation
/// whitelist, and an optional preferred model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_addendum: Option<String>,
    /// Tool allowlist; `None` means every registered tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// Subagent names this agent may delegate to via the task tool.
    #[serde(default)]
    pub can_delegate_to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

const READ_ONLY_TOOLS: &[&str] = &["read_file", "list_dir", "glob", "grep", "web_fetch"];

/// Process-wide registry of named agents.  Read-mostly after startup.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentSpec>>,
    default_agent: String,
}

impl AgentRegistry {
    /// Registry with the builtin roles: `cowork` (the default, full tool
    /// access), `explore` (read-only investigation) and `architect`
    /// (read-only design work that may delegate exploration).
    pub fn builtin() -> Self {
        let specs = vec![
            AgentSpec {
                name: "cowork".into(),
                description: "General coding agent with the full tool set".into(),
                prompt_addendum: None,
                tools: None,
                can_delegate_to: vec!["explore".into(), "architect".into()],
                model: None,
            },
            AgentSpec {
                name: "explore".into(),
                description: "Fast read-only repository exploration".into(),
                prompt_addendum: Some(
                    "You explore the repository and report findings. Do not \
                     attempt modifications; gather facts and answer precisely."
                        .into(),
                ),
                tools: Some(READ_ONLY_TOOLS.iter().map(|s| s.to_string()).collect()),
                can_delegate_to: vec![],
                model: None,
            },
            AgentSpec {
                name: "architect".into(),
                description: "Design and planning over a read-only view".into(),
                prompt_addendum: Some(
                    "You produce designs and plans. Read whatever you need, \
                     weigh alternatives, and answer with a concrete proposal."
                        .into(),
                ),
                tools: Some(READ_ONLY_TOOLS.iter().map(|s| s.to_string()).collect()),
                can_delegate_to: vec!["explore".into()],
                model: None,
            },
        ];
        let mut agents = HashMap::new();
        for spec in specs {
            agents.insert(spec.name.clone(), spec);
        }
        Self {
            agents: RwLock::new(agents),
            default_agent: "cowork".into(),
        }
    }

    pub fn get(&self, name: &str) -> Option<AgentSpec> {
        self.agents.read().unwrap().get(name).cloned()
    }

    pub fn default_spec(&self) -> AgentSpec {
        self.get(&self.default_agent)
            .expect("default agent must be registered")
    }

    pub fn register(&self, spec: AgentSpec) {
        self.agents.write().unwrap().insert(spec.name.clone(), spec);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `from` may spawn `to` as a subagent.
    pub fn may_delegate(&self, from: &str, to: &str) -> bool {
        self.get(from)
            .map(|spec| spec.can_delegate_to.iter().any(|n| n == to))
            .unwrap_or(false)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
