// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use maestro_config::Config;
use maestro_store::SessionStore;
use maestro_types::{
    Block, CanonicalUpdate, MessagePayload, ParsedTask, Result, SemanticEvent, SessionRecord,
    SessionRole, UpdatePayload,
};
use tokio::sync::{broadcast, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::launcher::ChildLauncher;
use crate::taskblock::extract_task_blocks;

/// Outcome of ingesting one piece of coordinator output.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub block_count: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    /// Coordinator text with blocks replaced by placeholders, for re-display.
    pub cleaned_text: String,
}

/// Creates child sessions on behalf of a parent, injects their prompts and
/// relates them back to the parent session.
#[derive(Clone)]
pub struct Orchestrator {
    store: SessionStore,
    launcher: Arc<dyn ChildLauncher>,
    config: Arc<Config>,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(store: SessionStore, launcher: Arc<dyn ChildLauncher>, config: Arc<Config>) -> Self {
        let n = config.tunables.delegation_concurrency.max(1);
        Self {
            store,
            launcher,
            config,
            permits: Arc::new(Semaphore::new(n)),
        }
    }

    /// Spawn one child session for `task` and fire its prompt. Returns the
    /// child id immediately; completion is observed via semantic events.
    pub async fn delegate(
        &self,
        parent_id: Uuid,
        task: &ParsedTask,
        role: SessionRole,
    ) -> Result<Uuid> {
        let (child_id, _events) = self.delegate_inner(parent_id, task, role).await?;
        Ok(child_id)
    }

    async fn delegate_inner(
        &self,
        parent_id: Uuid,
        task: &ParsedTask,
        role: SessionRole,
    ) -> Result<(Uuid, broadcast::Receiver<SemanticEvent>)> {
        let parent = self.store.get_session(parent_id).await?;

        let target = self.config.roles.for_role(role);
        let record = SessionRecord::new(
            parent.workspace_id.clone(),
            parent.cwd.clone(),
            target.provider.clone(),
            role,
        )
        .with_parent(parent_id)
        .with_system_header(role_header(role, target.model.as_deref()));
        let child_id = record.id;

        self.store.upsert_session(record.clone()).await;
        self.launcher.launch(&record).await?;

        // Subscribe before the prompt goes out so no completion event can
        // slip past the waiter.
        let events = self.store.subscribe(child_id)?;
        self.watch_child(parent_id, child_id, &task.title)?;

        let prompt = delegation_prompt(task);
        self.store.push_user_message(child_id, &prompt).await?;
        self.store.mark_first_prompt_sent(child_id).await?;
        self.launcher.send_prompt(child_id, &prompt).await?;

        info!(parent = %parent_id, child = %child_id, role = %role, task = %task.title, "delegated");
        Ok((child_id, events))
    }

    /// Notify the parent session when a child finishes, via its own event
    /// stream (a synthetic agent message on the parent's canonical stream).
    fn watch_child(&self, parent_id: Uuid, child_id: Uuid, title: &str) -> Result<()> {
        let store = self.store.clone();
        let title = title.to_string();
        let mut rx = self.store.subscribe(child_id)?;
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => {
                        let outcome = match &ev.block {
                            Block::AgentCompleted { .. } => "completed",
                            Block::AgentFailed { .. } => "failed",
                            _ => continue,
                        };
                        let note = CanonicalUpdate::new(
                            parent_id,
                            "maestro",
                            UpdatePayload::AgentMessage(MessagePayload::whole(format!(
                                "[delegation] child {child_id} ({title}) {outcome}"
                            ))),
                        );
                        if let Err(e) = store.push_canonical(note).await {
                            warn!(parent = %parent_id, "delegation notice dropped: {e}");
                        }
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    /// Extract task blocks from coordinator output and delegate each valid
    /// one, honouring the concurrency limit N: with N = 1 delegations
    /// serialise; with N > k, up to N children run in parallel and the rest
    /// queue.
    pub async fn ingest_coordinator_output(
        &self,
        parent_id: Uuid,
        text: &str,
    ) -> Result<IngestReport> {
        // The parent must exist before we fan anything out.
        self.store.get_session(parent_id).await?;

        let extraction = extract_task_blocks(text);
        let report = IngestReport {
            block_count: extraction.block_count,
            valid_count: extraction.valid_count,
            invalid_count: extraction.invalid_count,
            cleaned_text: extraction.cleaned_text.clone(),
        };

        for task in extraction.tasks {
            let orch = self.clone();
            let permits = self.permits.clone();
            let turn_budget = self.config.tunables.delegation_turn_timeout();
            tokio::spawn(async move {
                // Closed only at shutdown.
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                match orch
                    .delegate_inner(parent_id, &task, SessionRole::Implementor)
                    .await
                {
                    Ok((child_id, events)) => {
                        if !wait_for_turn_end(events, turn_budget).await {
                            warn!(child = %child_id, "delegated turn did not finish in budget");
                        }
                    }
                    Err(e) => {
                        warn!(parent = %parent_id, task = %task.title, "delegation failed: {e}");
                    }
                }
            });
        }
        Ok(report)
    }
}

/// Wait until the child emits `agent_completed` or `agent_failed`.
/// Returns false on timeout or a closed stream.
async fn wait_for_turn_end(
    mut events: broadcast::Receiver<SemanticEvent>,
    budget: std::time::Duration,
) -> bool {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(ev) if ev.block.is_turn_end() => return true,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    };
    tokio::time::timeout(budget, wait).await.unwrap_or(false)
}

fn role_header(role: SessionRole, model: Option<&str>) -> String {
    let mission = match role {
        SessionRole::Coordinator => {
            "You coordinate a team of specialists. Break work into @@@task blocks."
        }
        SessionRole::Implementor => "You implement one delegated task, end to end.",
        SessionRole::Verifier => "You review a sibling implementor's output.",
        SessionRole::Solo => "You handle the whole request in this session.",
    };
    match model {
        Some(m) => format!("{mission}\nPreferred model: {m}."),
        None => mission.to_string(),
    }
}

/// Compose the delegation prompt from the task's named sections.
fn delegation_prompt(task: &ParsedTask) -> String {
    let mut prompt = format!("# Delegated task: {}\n", task.title);
    let sections = [
        ("Objective", task.sections.objective.as_deref()),
        ("Scope", task.sections.scope.as_deref()),
        ("Inputs", task.sections.inputs.as_deref()),
        ("Definition of Done", task.sections.definition_of_done.as_deref()),
        ("Verification", task.sections.verification.as_deref()),
        ("Output Required", task.sections.output_required.as_deref()),
    ];
    for (name, content) in sections {
        if let Some(content) = content {
            prompt.push_str(&format!("\n## {name}\n{content}\n"));
        }
    }
    if prompt.trim_end().lines().count() == 1 {
        // No structured sections; fall back to the raw block body.
        prompt.push('\n');
        prompt.push_str(&task.text);
    }
    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
