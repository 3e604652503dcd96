// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use gent_core::{ActorHandle, AgentActor, CoreDeps, PermissionReply, PlanReply, SendArgs};
use gent_model::CompletionRequest;
use gent_storage::{EventFilter, EventStream, Storage};
use gent_types::{
    AgentEvent, Branch, EventStoreError, Message, PermissionDecision, PlanDecision, Session,
};

use crate::protocol::{BranchNode, RpcRequest, RpcResponse};

/// The RPC entry points exposed to UI clients.
///
/// Owns the actor supervision table: one [`AgentActor`] per
/// `(session, branch)` pair, spawned lazily on the first send or steer and
/// reused afterwards.  Everything else is a thin layer over the shared
/// [`CoreDeps`].
pub struct AgentService {
    deps: Arc<CoreDeps>,
    actors: Mutex<HashMap<(String, String), ActorHandle>>,
}

impl AgentService {
    pub fn new(deps: Arc<CoreDeps>) -> Self {
        Self {
            deps,
            actors: Mutex::new(HashMap::new()),
        }
    }

    pub fn deps(&self) -> &Arc<CoreDeps> {
        &self.deps
    }

    /// Dispatch one decoded request.  Errors are folded into
    /// [`RpcResponse::Error`]; the connection never sees a failure.
    pub async fn handle_request(&self, request: RpcRequest) -> RpcResponse {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => RpcResponse::Error {
                message: format!("{e:#}"),
            },
        }
    }

    async fn dispatch(&self, request: RpcRequest) -> anyhow::Result<RpcResponse> {
        match request {
            RpcRequest::CreateSession {
                name,
                first_message,
                cwd,
                bypass,
            } => {
                self.create_session(name, first_message, cwd, bypass.unwrap_or(false))
                    .await
            }
            RpcRequest::ListSessions { cwd } => {
                let sessions = self.deps.storage.list_sessions(cwd.as_deref()).await?;
                Ok(RpcResponse::Sessions { sessions })
            }
            RpcRequest::GetSession { session_id } => {
                let session = self.deps.storage.get_session(&session_id).await?;
                Ok(RpcResponse::Session { session })
            }
            RpcRequest::ListBranches { session_id } => {
                let branches = self.deps.storage.list_branches(&session_id).await?;
                Ok(RpcResponse::Branches { branches })
            }
            RpcRequest::CreateBranch { session_id, name } => {
                let mut branch = Branch::root(&session_id);
                branch.name = name;
                self.deps.storage.create_branch(branch.clone()).await?;
                self.deps
                    .events
                    .publish(AgentEvent::BranchCreated {
                        session_id,
                        branch: branch.clone(),
                    })
                    .await?;
                Ok(RpcResponse::Branch { branch })
            }
            RpcRequest::ForkBranch {
                session_id,
                branch_id,
                message_id,
                name,
            } => {
                self.fork_branch(&session_id, &branch_id, &message_id, name)
                    .await
            }
            RpcRequest::SwitchBranch {
                session_id,
                branch_id,
            } => {
                let branch = self.deps.storage.get_branch(&branch_id).await?;
                anyhow::ensure!(
                    branch.session_id == session_id,
                    "branch {branch_id} does not belong to session {session_id}"
                );
                self.deps
                    .events
                    .publish(AgentEvent::BranchSwitched {
                        session_id,
                        branch_id,
                    })
                    .await?;
                Ok(RpcResponse::Ok)
            }
            RpcRequest::GetBranchTree { session_id } => {
                let branches = self.deps.storage.list_branches(&session_id).await?;
                Ok(RpcResponse::BranchTree {
                    roots: build_tree(branches),
                })
            }
            RpcRequest::SendMessage {
                session_id,
                branch_id,
                content,
                mode,
                model,
            } => {
                let handle = self.actor(&session_id, &branch_id).await;
                handle
                    .send_message(SendArgs {
                        content,
                        mode,
                        model,
                    })
                    .await?;
                Ok(RpcResponse::Ok)
            }
            RpcRequest::ListMessages { branch_id } => {
                let messages = self.deps.storage.list_messages(&branch_id).await?;
                Ok(RpcResponse::Messages { messages })
            }
            RpcRequest::GetSessionState { session_id } => {
                let session = self.deps.storage.get_session(&session_id).await?;
                let branches = self.deps.storage.list_branches(&session_id).await?;
                let latest = self.deps.storage.get_latest_branch(&session_id).await?;
                let messages = self.deps.storage.list_messages(&latest.id).await?;
                Ok(RpcResponse::SessionState {
                    session,
                    branches,
                    messages,
                })
            }
            RpcRequest::Steer {
                session_id,
                branch_id,
                steer,
            } => {
                let handle = self.actor(&session_id, &branch_id).await;
                handle.steer(steer).await?;
                Ok(RpcResponse::Ok)
            }
            RpcRequest::RespondPermission {
                request_id,
                decision,
                persist,
                pattern,
            } => {
                self.respond_permission(&request_id, decision, persist.unwrap_or(false), pattern)
                    .await?;
                Ok(RpcResponse::Ok)
            }
            RpcRequest::RespondPlan {
                request_id,
                decision,
                reason,
            } => {
                self.respond_plan(&request_id, decision, reason).await?;
                Ok(RpcResponse::Ok)
            }
            RpcRequest::RespondQuestions {
                request_id,
                answers,
            } => {
                self.deps
                    .handlers
                    .questions
                    .respond(&request_id, answers)
                    .await?;
                Ok(RpcResponse::Ok)
            }
            RpcRequest::UpdateSessionBypass { session_id, bypass } => {
                let mut session = self.deps.storage.get_session(&session_id).await?;
                session.bypass = bypass;
                session.updated_at = chrono::Utc::now();
                self.deps.storage.update_session(session).await?;
                Ok(RpcResponse::Bypass { bypass })
            }
            RpcRequest::CompactBranch {
                session_id,
                branch_id,
            } => {
                self.deps.checkpoints.compact(&session_id, &branch_id).await?;
                Ok(RpcResponse::Ok)
            }
        }
    }

    /// Live event subscription with cursor replay; see spec on the
    /// [`gent_storage::EventStore`] for the seamlessness guarantees.
    pub async fn subscribe_events(
        &self,
        session_id: String,
        branch_id: Option<String>,
        after: Option<u64>,
    ) -> Result<EventStream, EventStoreError> {
        self.deps
            .events
            .subscribe(EventFilter {
                session_id,
                branch_id,
                after,
            })
            .await
    }

    // ── Session lifecycle ─────────────────────────────────────────────────────

    async fn create_session(
        &self,
        name: Option<String>,
        first_message: Option<String>,
        cwd: Option<String>,
        bypass: bool,
    ) -> anyhow::Result<RpcResponse> {
        let session = Session::new(name.clone(), cwd, bypass);
        self.deps.storage.create_session(session.clone()).await?;
        let branch = Branch::root(&session.id);
        self.deps.storage.create_branch(branch.clone()).await?;
        self.deps
            .events
            .publish(AgentEvent::SessionStarted {
                session_id: session.id.clone(),
                branch_id: branch.id.clone(),
            })
            .await?;
        info!(session_id = %session.id, "session created");

        if let Some(content) = first_message {
            // Title generation is fire-and-forget; a failed title leaves
            // the placeholder name in place.
            if name.is_none() {
                self.spawn_title_task(&session.id, &content);
            }
            let handle = self.actor(&session.id, &branch.id).await;
            handle.send_message(SendArgs::text(content)).await?;
        }

        Ok(RpcResponse::SessionCreated {
            session_id: session.id,
            branch_id: branch.id,
            name,
            bypass,
        })
    }

    fn spawn_title_task(&self, session_id: &str, first_message: &str) {
        let deps = self.deps.clone();
        let session_id = session_id.to_string();
        let prompt = format!(
            "Write a 3-6 word title for a coding session that starts with \
             this request. Respond with the title only.\n\n{first_message}"
        );
        tokio::spawn(async move {
            let request = CompletionRequest {
                model: deps.config.models.summarizer_model.clone(),
                messages: vec![Message::user(&session_id, "", prompt)],
                ..Default::default()
            };
            let title = match deps.summarizer.generate(request).await {
                Ok(title) => title.trim().trim_matches('"').to_string(),
                Err(e) => {
                    warn!(%session_id, "session title generation failed: {e}");
                    return;
                }
            };
            if title.is_empty() {
                return;
            }
            let Ok(mut session) = deps.storage.get_session(&session_id).await else {
                return;
            };
            session.name = Some(title.clone());
            session.updated_at = chrono::Utc::now();
            if deps.storage.update_session(session).await.is_ok() {
                let _ = deps
                    .events
                    .publish(AgentEvent::SessionNameUpdated {
                        session_id,
                        name: title,
                    })
                    .await;
            }
        });
    }

    // ── Branches ──────────────────────────────────────────────────────────────

    /// Fork: a new branch whose history is the source branch up to and
    /// including `message_id`.
    async fn fork_branch(
        &self,
        session_id: &str,
        branch_id: &str,
        message_id: &str,
        name: Option<String>,
    ) -> anyhow::Result<RpcResponse> {
        let source = self.deps.storage.get_branch(branch_id).await?;
        anyhow::ensure!(
            source.session_id == session_id,
            "branch {branch_id} does not belong to session {session_id}"
        );
        let messages = self.deps.storage.list_messages(branch_id).await?;
        let cut = messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| anyhow::anyhow!("message {message_id} not found on {branch_id}"))?;

        let fork = Branch::fork(&source, message_id, name);
        self.deps.storage.create_branch(fork.clone()).await?;
        for message in &messages[..=cut] {
            let mut copy = message.clone();
            copy.branch_id = fork.id.clone();
            self.deps.storage.create_message(copy).await?;
        }
        self.deps
            .events
            .publish(AgentEvent::BranchCreated {
                session_id: session_id.to_string(),
                branch: fork.clone(),
            })
            .await?;
        Ok(RpcResponse::Branch { branch: fork })
    }

    // ── Interaction responses ─────────────────────────────────────────────────

    async fn respond_permission(
        &self,
        request_id: &str,
        decision: PermissionDecision,
        persist: bool,
        pattern: Option<String>,
    ) -> anyhow::Result<()> {
        self.deps
            .handlers
            .permission
            .respond(
                request_id,
                PermissionReply {
                    decision,
                    persist,
                    pattern,
                },
            )
            .await?;
        Ok(())
    }

    async fn respond_plan(
        &self,
        request_id: &str,
        decision: PlanDecision,
        reason: Option<String>,
    ) -> anyhow::Result<()> {
        let resolution = self
            .deps
            .handlers
            .plan
            .respond(request_id, PlanReply { decision, reason })
            .await?;
        // A confirmed plan supersedes the prior conversation: everything
        // before the checkpoint is dropped from future context loads and
        // only the plan file carries over.
        if let Some(resolution) = resolution {
            if resolution.decision == PlanDecision::Confirm {
                self.deps
                    .checkpoints
                    .create_plan_checkpoint(&resolution.branch_id, &resolution.plan_path)
                    .await?;
            }
        }
        Ok(())
    }

    // ── Actor supervision ─────────────────────────────────────────────────────

    async fn actor(&self, session_id: &str, branch_id: &str) -> ActorHandle {
        let key = (session_id.to_string(), branch_id.to_string());
        let mut actors = self.actors.lock().await;
        actors
            .entry(key)
            .or_insert_with(|| AgentActor::spawn(self.deps.clone(), session_id, branch_id))
            .clone()
    }
}

fn build_tree(branches: Vec<Branch>) -> Vec<BranchNode> {
    fn children_of(parent: Option<&str>, branches: &[Branch]) -> Vec<BranchNode> {
        branches
            .iter()
            .filter(|b| b.parent_branch_id.as_deref() == parent)
            .map(|b| BranchNode {
                branch: b.clone(),
                children: children_of(Some(&b.id), branches),
            })
            .collect()
    }
    children_of(None, &branches)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
