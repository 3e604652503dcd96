// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tracing::{debug, warn};

use gent_config::CheckpointConfig;
use gent_model::{CompletionRequest, Provider};
use gent_storage::{EventStore, Storage};
use gent_types::{
    estimate_tokens, AgentEvent, Checkpoint, Message, MessagePart, Role, StorageError,
    ToolResultOutput,
};

const SUMMARY_SYSTEM_PROMPT: &str = "You summarise coding-assistant conversations. \
     Compress the transcript into a handover brief for a colleague taking over: \
     decisions made and their reasons, open questions, files touched, and the \
     current state of the task. Respond with the summary only.";

/// Decides when to compact and assembles the context window the loop sends
/// to the provider.
///
/// Compaction failures are never fatal: callers log and carry on with the
/// uncompacted history.
pub struct CheckpointService {
    storage: Arc<dyn Storage>,
    events: Arc<EventStore>,
    summarizer: Arc<dyn Provider>,
    summarizer_model: String,
    config: CheckpointConfig,
}

impl CheckpointService {
    pub fn new(
        storage: Arc<dyn Storage>,
        events: Arc<EventStore>,
        summarizer: Arc<dyn Provider>,
        summarizer_model: impl Into<String>,
        config: CheckpointConfig,
    ) -> Self {
        Self {
            storage,
            events,
            summarizer,
            summarizer_model: summarizer_model.into(),
            config,
        }
    }

    /// The context the next provider call will see, per the latest
    /// checkpoint of the branch:
    /// - no checkpoint: all messages;
    /// - compaction: synthetic system message with the summary, then
    ///   messages from `first_kept_message_id`;
    /// - plan: synthetic system message with the plan file contents, then
    ///   messages created after the checkpoint.
    pub async fn load_context(&self, branch_id: &str) -> Result<Vec<Message>, StorageError> {
        let (carried, window) = self.window(branch_id).await?;
        let mut context = Vec::with_capacity(window.len() + 1);
        if let Some(text) = carried {
            let session_id = window
                .first()
                .map(|m| m.session_id.clone())
                .unwrap_or_else(|| self.session_of(branch_id));
            context.push(Message::system(session_id, branch_id, text));
        }
        context.extend(window);
        Ok(context)
    }

    /// `true` when the estimated context size crosses the threshold.
    /// Consulted between turns, never mid-stream.
    pub async fn should_compact(&self, branch_id: &str) -> Result<bool, StorageError> {
        let context = self.load_context(branch_id).await?;
        Ok(estimate_tokens(&context) >= self.config.compact_threshold)
    }

    /// Carried synthetic context plus the persisted messages visible under
    /// the latest checkpoint.
    async fn window(
        &self,
        branch_id: &str,
    ) -> Result<(Option<String>, Vec<Message>), StorageError> {
        match self.storage.get_latest_checkpoint(branch_id).await? {
            None => Ok((None, self.storage.list_messages(branch_id).await?)),
            Some(Checkpoint::Compaction {
                summary,
                first_kept_message_id,
                ..
            }) => {
                let kept = if first_kept_message_id.is_empty() {
                    Vec::new()
                } else {
                    let all = self.storage.list_messages(branch_id).await?;
                    let pos = all.iter().position(|m| m.id == first_kept_message_id);
                    match pos {
                        Some(pos) => all[pos..].to_vec(),
                        None => {
                            warn!(branch_id, "compaction anchor message missing; using full history");
                            all
                        }
                    }
                };
                let carried = (!summary.is_empty()).then_some(summary);
                Ok((carried, kept))
            }
            Some(Checkpoint::Plan {
                plan_path,
                created_at,
                ..
            }) => {
                let kept = self
                    .storage
                    .list_messages_since(branch_id, created_at)
                    .await?;
                let carried = match tokio::fs::read_to_string(&plan_path).await {
                    Ok(contents) => Some(format!("Active plan ({plan_path}):\n{contents}")),
                    Err(e) => {
                        warn!(plan_path, "plan file unreadable, continuing without it: {e}");
                        None
                    }
                };
                Ok((carried, kept))
            }
        }
    }

    /// Summarise the head of the branch and persist a compaction
    /// checkpoint.  The tail — the last `max(ceil(tail_fraction × N),
    /// tail_minimum)` messages — is kept verbatim.  An empty head persists
    /// an empty-summary checkpoint without a provider call.
    pub async fn create_compaction_checkpoint(
        &self,
        branch_id: &str,
    ) -> anyhow::Result<Checkpoint> {
        let (carried, window) = self.window(branch_id).await?;
        let n = window.len();
        let tail_len = ((n as f32 * self.config.tail_fraction).ceil() as usize)
            .max(self.config.tail_minimum)
            .min(n);
        let head = &window[..n - tail_len];
        let tail = &window[n - tail_len..];
        let first_kept = tail.first().map(|m| m.id.clone()).unwrap_or_default();
        let token_count = estimate_tokens(&window);

        if head.is_empty() {
            let checkpoint = Checkpoint::compaction(branch_id, "", first_kept, n, token_count);
            self.storage.create_checkpoint(checkpoint.clone()).await?;
            return Ok(checkpoint);
        }

        let mut transcript = String::new();
        if let Some(prior) = &carried {
            transcript.push_str("Prior context:\n");
            transcript.push_str(prior);
            transcript.push_str("\n\n");
        }
        transcript.push_str("Transcript to summarise:\n");
        for message in head {
            render_message(&mut transcript, message);
        }

        debug!(
            branch_id,
            head = head.len(),
            tail = tail.len(),
            "requesting compaction summary"
        );
        let session_id = head[0].session_id.clone();
        let summary = self
            .summarizer
            .generate(CompletionRequest {
                model: self.summarizer_model.clone(),
                messages: vec![Message::user(session_id, branch_id, transcript)],
                system_prompt: Some(SUMMARY_SYSTEM_PROMPT.to_string()),
                max_tokens: Some(self.config.summary_max_tokens),
                ..Default::default()
            })
            .await
            .context("compaction summariser call failed")?;

        let checkpoint = Checkpoint::compaction(branch_id, summary, first_kept, n, token_count);
        self.storage.create_checkpoint(checkpoint.clone()).await?;
        Ok(checkpoint)
    }

    /// Persist a plan checkpoint: everything before it is superseded; the
    /// only carry-over is the file at `plan_path`.
    pub async fn create_plan_checkpoint(
        &self,
        branch_id: &str,
        plan_path: &str,
    ) -> Result<Checkpoint, StorageError> {
        let messages = self.storage.list_messages(branch_id).await?;
        let checkpoint = Checkpoint::plan(
            branch_id,
            plan_path,
            messages.len(),
            estimate_tokens(&messages),
        );
        self.storage.create_checkpoint(checkpoint.clone()).await?;
        Ok(checkpoint)
    }

    /// Event-publishing compaction entry point used by the loop's side trip
    /// and the `compactBranch` RPC.
    pub async fn compact(&self, session_id: &str, branch_id: &str) -> anyhow::Result<Checkpoint> {
        let tokens_before = estimate_tokens(&self.load_context(branch_id).await?);
        self.events
            .publish(AgentEvent::CompactionStarted {
                session_id: session_id.to_string(),
                branch_id: branch_id.to_string(),
            })
            .await?;
        let checkpoint = self.create_compaction_checkpoint(branch_id).await?;
        let tokens_after = estimate_tokens(&self.load_context(branch_id).await?);
        self.events
            .publish(AgentEvent::CompactionCompleted {
                session_id: session_id.to_string(),
                branch_id: branch_id.to_string(),
                checkpoint_id: checkpoint.id().to_string(),
                tokens_before,
                tokens_after,
            })
            .await?;
        Ok(checkpoint)
    }

    /// Per-turn softening pass applied to the context before send: keep the
    /// newest `prune_protect` tokens of tool-result output verbatim and
    /// blank older ones.  Skipped entirely unless the excess exceeds
    /// `prune_minimum`.
    pub fn prune(&self, mut messages: Vec<Message>) -> Vec<Message> {
        let total: usize = messages
            .iter()
            .flat_map(|m| m.parts.iter())
            .map(tool_result_tokens)
            .sum();
        if total <= self.config.prune_protect + self.config.prune_minimum {
            return messages;
        }

        let mut kept = 0usize;
        for message in messages.iter_mut().rev() {
            for part in message.parts.iter_mut().rev() {
                let tokens = tool_result_tokens(part);
                if tokens == 0 {
                    continue;
                }
                if kept + tokens <= self.config.prune_protect {
                    kept += tokens;
                } else if let MessagePart::ToolResult { output, .. } = part {
                    *output = ToolResultOutput::Json(json!({ "_pruned": true }));
                }
            }
        }
        messages
    }

    fn session_of(&self, _branch_id: &str) -> String {
        // Only reached for a fully summarised-away branch; the synthetic
        // message's session id is informational there.
        String::new()
    }
}

fn tool_result_tokens(part: &MessagePart) -> usize {
    match part {
        MessagePart::ToolResult { output, .. } => {
            output.value().to_string().len().div_ceil(4)
        }
        _ => 0,
    }
}

/// Compact plain-text rendering of one message for the summariser prompt.
fn render_message(out: &mut String, message: &Message) {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    };
    for part in &message.parts {
        match part {
            MessagePart::Text { text } => {
                out.push_str(role);
                out.push_str(": ");
                out.push_str(text);
                out.push('\n');
            }
            MessagePart::ToolCall {
                tool_name, input, ..
            } => {
                out.push_str(&format!("{role} called {tool_name}({input})\n"));
            }
            MessagePart::ToolResult {
                tool_name, output, ..
            } => {
                let value = output.value().to_string();
                let mut end = value.len().min(400);
                while !value.is_char_boundary(end) {
                    end -= 1;
                }
                out.push_str(&format!("{tool_name} -> {}\n", &value[..end]));
            }
            // Reasoning is model-private; images carry no text.
            MessagePart::Reasoning { .. } | MessagePart::Image { .. } => {}
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use gent_config::EventsConfig;
    use gent_model::ScriptedProvider;
    use gent_storage::MemoryStorage;
    use gent_types::{Branch, Session};

    use super::*;

    struct Fixture {
        storage: Arc<MemoryStorage>,
        service: CheckpointService,
        session: Session,
        branch: Branch,
        summarizer: Arc<ScriptedProvider>,
    }

    async fn fixture(config: CheckpointConfig) -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let session = Session::new(None, None, false);
        storage.create_session(session.clone()).await.unwrap();
        let branch = Branch::root(&session.id);
        storage.create_branch(branch.clone()).await.unwrap();
        let events = Arc::new(EventStore::new(storage.clone(), &EventsConfig::default()));
        let summarizer =
            Arc::new(ScriptedProvider::new(vec![]).with_generate_reply("condensed history"));
        let service = CheckpointService::new(
            storage.clone(),
            events,
            summarizer.clone(),
            "summarizer",
            config,
        );
        Fixture {
            storage,
            service,
            session,
            branch,
            summarizer,
        }
    }

    async fn push_messages(f: &Fixture, count: usize, chars_each: usize) -> Vec<String> {
        let mut ids = Vec::new();
        for i in 0..count {
            let text = format!("{i:04}{}", "x".repeat(chars_each.saturating_sub(4)));
            let m = Message::user(&f.session.id, &f.branch.id, text);
            ids.push(m.id.clone());
            f.storage.create_message(m).await.unwrap();
        }
        ids
    }

    #[tokio::test]
    async fn no_checkpoint_loads_full_history() {
        let f = fixture(CheckpointConfig::default()).await;
        push_messages(&f, 3, 8).await;
        let context = f.service.load_context(&f.branch.id).await.unwrap();
        assert_eq!(context.len(), 3);
    }

    #[tokio::test]
    async fn should_compact_follows_threshold() {
        let f = fixture(CheckpointConfig {
            compact_threshold: 100,
            ..CheckpointConfig::default()
        })
        .await;
        push_messages(&f, 2, 40).await; // ~20 tokens
        assert!(!f.service.should_compact(&f.branch.id).await.unwrap());
        push_messages(&f, 10, 40).await; // well past 100 tokens
        assert!(f.service.should_compact(&f.branch.id).await.unwrap());
    }

    #[tokio::test]
    async fn compaction_keeps_formula_tail_and_anchors_first_kept() {
        let f = fixture(CheckpointConfig::default()).await;
        let ids = push_messages(&f, 30, 40).await;

        let checkpoint = f
            .service
            .create_compaction_checkpoint(&f.branch.id)
            .await
            .unwrap();

        // tail = max(ceil(0.2 × 30), 10) = 10, so the anchor is message 21.
        match &checkpoint {
            Checkpoint::Compaction {
                summary,
                first_kept_message_id,
                message_count,
                ..
            } => {
                assert_eq!(summary, "condensed history");
                assert_eq!(first_kept_message_id, &ids[20]);
                assert_eq!(*message_count, 30);
            }
            other => panic!("expected compaction checkpoint, got {other:?}"),
        }

        // The summariser saw the 20-message head, not the tail.
        let req = f.summarizer.generate_requests.lock().unwrap()[0].clone();
        let prompt = req.messages[0].text();
        assert!(prompt.contains("0000"), "head start missing: {prompt}");
        assert!(prompt.contains("0019"), "head end missing");
        assert!(!prompt.contains("0020"), "tail leaked into summary prompt");

        // Subsequent context: synthetic summary + 10 tail messages.
        let context = f.service.load_context(&f.branch.id).await.unwrap();
        assert_eq!(context.len(), 11);
        assert_eq!(context[0].role, Role::System);
        assert!(context[0].text().contains("condensed history"));
        assert!(context[1].text().starts_with("0020"));
    }

    #[tokio::test]
    async fn small_branch_compaction_is_empty_summary_without_provider_call() {
        let f = fixture(CheckpointConfig::default()).await;
        let ids = push_messages(&f, 5, 8).await; // fewer than tail_minimum

        let checkpoint = f
            .service
            .create_compaction_checkpoint(&f.branch.id)
            .await
            .unwrap();
        match &checkpoint {
            Checkpoint::Compaction {
                summary,
                first_kept_message_id,
                ..
            } => {
                assert!(summary.is_empty());
                assert_eq!(first_kept_message_id, &ids[0]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(f.summarizer.generate_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_branch_compaction_uses_sentinel_anchor() {
        let f = fixture(CheckpointConfig::default()).await;
        let checkpoint = f
            .service
            .create_compaction_checkpoint(&f.branch.id)
            .await
            .unwrap();
        match checkpoint {
            Checkpoint::Compaction {
                first_kept_message_id,
                summary,
                ..
            } => {
                assert_eq!(first_kept_message_id, "");
                assert!(summary.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn plan_checkpoint_carries_only_the_plan_file() {
        let f = fixture(CheckpointConfig::default()).await;
        push_messages(&f, 4, 8).await;

        let plan = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(plan.path(), "1. refactor storage\n2. add tests\n").unwrap();

        f.service
            .create_plan_checkpoint(&f.branch.id, &plan.path().to_string_lossy())
            .await
            .unwrap();

        // Old messages are superseded.
        let context = f.service.load_context(&f.branch.id).await.unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].role, Role::System);
        assert!(context[0].text().contains("refactor storage"));

        // New messages appear after the synthetic plan message.
        f.storage
            .create_message(Message::user(&f.session.id, &f.branch.id, "continue"))
            .await
            .unwrap();
        let context = f.service.load_context(&f.branch.id).await.unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context[1].text(), "continue");
    }

    #[tokio::test]
    async fn compact_publishes_started_and_completed() {
        use tokio_stream::StreamExt;
        let f = fixture(CheckpointConfig::default()).await;
        push_messages(&f, 30, 40).await;

        f.service
            .compact(&f.session.id, &f.branch.id)
            .await
            .unwrap();

        let events: Vec<_> = f
            .service
            .events
            .subscribe(gent_storage::EventFilter {
                session_id: f.session.id.clone(),
                ..Default::default()
            })
            .await
            .unwrap()
            .take(2)
            .collect()
            .await;
        assert!(matches!(
            events[0].as_ref().unwrap().event,
            AgentEvent::CompactionStarted { .. }
        ));
        match &events[1].as_ref().unwrap().event {
            AgentEvent::CompactionCompleted {
                tokens_before,
                tokens_after,
                ..
            } => assert!(tokens_after < tokens_before),
            other => panic!("expected CompactionCompleted, got {other:?}"),
        }
    }

    // ── Pruning ───────────────────────────────────────────────────────────────

    fn tool_result_message(session: &str, branch: &str, chars: usize) -> Message {
        Message::tool_results(
            session,
            branch,
            vec![MessagePart::ToolResult {
                tool_call_id: "t".into(),
                tool_name: "read_file".into(),
                output: ToolResultOutput::Json(json!("y".repeat(chars))),
            }],
        )
    }

    #[tokio::test]
    async fn prune_is_identity_under_protect_budget() {
        let f = fixture(CheckpointConfig {
            prune_protect: 1_000,
            prune_minimum: 100,
            ..CheckpointConfig::default()
        })
        .await;
        let messages = vec![
            Message::user("s", "b", "hello"),
            tool_result_message("s", "b", 400),
        ];
        let pruned = f.service.prune(messages.clone());
        assert_eq!(
            estimate_tokens(&pruned),
            estimate_tokens(&messages),
            "prune must not touch messages under the protect budget"
        );
    }

    #[tokio::test]
    async fn prune_replaces_oldest_results_beyond_protect() {
        let f = fixture(CheckpointConfig {
            prune_protect: 250,
            prune_minimum: 50,
            ..CheckpointConfig::default()
        })
        .await;
        // Three results of ~101 tokens each; the newest two fit under the
        // protect budget, the oldest does not.
        let messages = vec![
            tool_result_message("s", "b", 400),
            tool_result_message("s", "b", 400),
            tool_result_message("s", "b", 400),
        ];
        let pruned = f.service.prune(messages.clone());
        assert!(estimate_tokens(&pruned) < estimate_tokens(&messages));

        let outputs: Vec<&ToolResultOutput> = pruned
            .iter()
            .flat_map(|m| m.parts.iter())
            .filter_map(|p| match p {
                MessagePart::ToolResult { output, .. } => Some(output),
                _ => None,
            })
            .collect();
        assert_eq!(outputs[0].value(), &json!({ "_pruned": true }));
        assert!(outputs[1].value().is_string());
        assert!(outputs[2].value().is_string());
    }
}
