// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

// The core never reads config files itself; the embedding CLI resolves
// whatever layering it wants (flags, env, files) and hands the core a fully
// populated `CoreConfig`.  Every field therefore has a usable default so
// `CoreConfig::default()` is a working configuration for tests.

fn default_model() -> String {
    "default".to_string()
}

fn default_summarizer_model() -> String {
    "summarizer".to_string()
}

fn default_max_rounds() -> u32 {
    50
}

fn default_mailbox_capacity() -> usize {
    64
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_initial_ms() -> u64 {
    500
}

fn default_retry_max_ms() -> u64 {
    30_000
}

fn default_compact_threshold() -> usize {
    100_000
}

fn default_tail_fraction() -> f32 {
    0.2
}

fn default_tail_minimum() -> usize {
    10
}

fn default_prune_protect() -> usize {
    40_000
}

fn default_prune_minimum() -> usize {
    20_000
}

fn default_summary_max_tokens() -> u32 {
    2_000
}

fn default_parallel_permits() -> usize {
    4
}

fn default_shell_timeout_secs() -> u64 {
    120
}

fn default_subscriber_buffer() -> usize {
    1_024
}

fn default_subagent_attempts() -> u32 {
    3
}

fn default_subagent_timeout_ms() -> u64 {
    300_000
}

fn default_subagent_depth() -> usize {
    3
}

/// Top-level resolved configuration handed to the core at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub agent_loop: AgentLoopConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub tools: ToolRunnerConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub subagent: SubagentConfig,
}

/// Which model ids the loop resolves for each role.
///
/// Model ids are opaque to the core; the `Provider` implementation maps them
/// to whatever its vendor calls them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model used for normal build-mode turns when the session/branch does
    /// not override it.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Optional remap applied while the session is in plan mode.
    #[serde(default)]
    pub plan_model: Option<String>,
    /// Model used for compaction summaries and session titles.  Configured
    /// separately because a small fast model is usually the right choice.
    #[serde(default = "default_summarizer_model")]
    pub summarizer_model: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            plan_model: None,
            summarizer_model: default_summarizer_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    /// Maximum provider round-trips per user turn before the loop gives up.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Bounded capacity of the actor mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

/// Exponential backoff applied to retryable provider failures.
/// Delay for attempt `n` is `initial_delay_ms * 2^n`, capped at `max_delay_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_ms: default_retry_initial_ms(),
            max_delay_ms: default_retry_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Estimated-token threshold above which the loop compacts between turns.
    #[serde(default = "default_compact_threshold")]
    pub compact_threshold: usize,
    /// Fraction of the branch kept verbatim as the compaction tail.
    #[serde(default = "default_tail_fraction")]
    pub tail_fraction: f32,
    /// Lower bound on the tail length regardless of the fraction.
    #[serde(default = "default_tail_minimum")]
    pub tail_minimum: usize,
    /// Newest tool-result tokens kept verbatim by the per-turn pruning pass.
    #[serde(default = "default_prune_protect")]
    pub prune_protect: usize,
    /// Pruning is skipped unless the excess over `prune_protect` exceeds this.
    #[serde(default = "default_prune_minimum")]
    pub prune_minimum: usize,
    /// Output budget requested from the summariser model.
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            compact_threshold: default_compact_threshold(),
            tail_fraction: default_tail_fraction(),
            tail_minimum: default_tail_minimum(),
            prune_protect: default_prune_protect(),
            prune_minimum: default_prune_minimum(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRunnerConfig {
    /// Permit count of the shared semaphore for `parallel` tools.
    #[serde(default = "default_parallel_permits")]
    pub parallel_permits: usize,
    /// Default wall-clock bound for the shell tool.
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,
}

impl Default for ToolRunnerConfig {
    fn default() -> Self {
        Self {
            parallel_permits: default_parallel_permits(),
            shell_timeout_secs: default_shell_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Per-subscriber buffered envelopes before the subscriber is dropped as
    /// a slow consumer.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentConfig {
    /// Transient-failure retries for one delegated task.
    #[serde(default = "default_subagent_attempts")]
    pub max_attempts: u32,
    /// Wall-clock bound for one delegated task, all retries included.
    #[serde(default = "default_subagent_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum delegation nesting.
    #[serde(default = "default_subagent_depth")]
    pub max_depth: usize,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_subagent_attempts(),
            timeout_ms: default_subagent_timeout_ms(),
            max_depth: default_subagent_depth(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
