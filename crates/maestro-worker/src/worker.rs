// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use maestro_config::Config;
use maestro_orch::ChildLauncher;
use maestro_store::SessionStore;
use maestro_types::{BackgroundTask, Result, SessionRecord, SessionRole, TaskStatus};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::queue::TaskQueue;

/// Singleton polling worker that drains the background queue.
pub struct TaskWorker {
    queue: TaskQueue,
    store: SessionStore,
    launcher: Arc<dyn ChildLauncher>,
    config: Arc<Config>,
    started: AtomicBool,
}

impl TaskWorker {
    pub fn new(
        queue: TaskQueue,
        store: SessionStore,
        launcher: Arc<dyn ChildLauncher>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            store,
            launcher,
            config,
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the dispatch and completion-scan loops. Starting twice is a
    /// no-op; returns whether this call actually started the worker.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("task worker already running");
            return false;
        }
        info!("task worker started");

        let worker = self.clone();
        let dispatch_every = self.config.tunables.dispatch_interval();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(dispatch_every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                worker.dispatch_pending().await;
            }
        });

        let worker = self.clone();
        let scan_every = self.config.tunables.completion_scan_interval();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(scan_every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                worker.check_completions().await;
            }
        });
        true
    }

    /// One dispatch iteration: claim each PENDING task and fire its prompt.
    /// Returns the number of tasks dispatched.
    pub async fn dispatch_pending(&self) -> usize {
        let tasks = match self.queue.list(None).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("pending fetch failed: {e}");
                return 0;
            }
        };

        let mut dispatched = 0;
        for task in tasks.into_iter().filter(|t| t.status == TaskStatus::Pending) {
            // Optimistic claim: losing the race means another worker has it.
            let claimed = self
                .store
                .persistence()
                .update_task_status(task.id, TaskStatus::Pending, TaskStatus::Running)
                .await
                .unwrap_or(false);
            if !claimed {
                continue;
            }
            match self.dispatch_one(&task).await {
                Ok(session_id) => {
                    dispatched += 1;
                    info!(task = %task.id, session = %session_id, "background task dispatched");
                }
                Err(e) => {
                    warn!(task = %task.id, "dispatch failed: {e}");
                    self.fail_task(task.id, &e.to_string()).await;
                }
            }
        }
        dispatched
    }

    /// Create the session, bind it to the task, and send the prompt. The
    /// task completes when the session is later reaped — not here.
    async fn dispatch_one(&self, task: &BackgroundTask) -> Result<Uuid> {
        let (provider, role, header) = self.resolve_target(&task.agent_id);
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let record = SessionRecord::new(task.workspace_id.clone(), cwd, provider, role)
            .with_specialist(task.agent_id.clone())
            .with_system_header(header);
        let session_id = record.id;

        self.store.upsert_session(record.clone()).await;
        self.store.bind_task(session_id, task.id);
        self.launcher.launch(&record).await?;

        self.store.push_user_message(session_id, &task.prompt).await?;
        self.store.mark_first_prompt_sent(session_id).await?;
        self.launcher.send_prompt(session_id, &task.prompt).await?;

        // Record the session against the task (progress queries need it).
        if let Ok(Some(mut stored)) = self.store.persistence().get_task(task.id).await {
            stored.session_id = Some(session_id);
            stored.updated_at = chrono::Utc::now();
            if let Err(e) = self.store.persistence().save_task(&stored).await {
                warn!(task = %task.id, "session binding not persisted: {e}");
            }
        }
        Ok(session_id)
    }

    /// One completion scan: a RUNNING task whose session the store no longer
    /// lists has finished. Returns the number completed.
    pub async fn check_completions(&self) -> usize {
        let tasks = match self.queue.list(None).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("completion scan fetch failed: {e}");
                return 0;
            }
        };

        let mut completed = 0;
        for task in tasks.into_iter().filter(|t| t.status == TaskStatus::Running) {
            let Some(session_id) = task.session_id else { continue };
            if self.store.contains(session_id) {
                continue;
            }
            let flipped = self
                .store
                .persistence()
                .update_task_status(task.id, TaskStatus::Running, TaskStatus::Completed)
                .await
                .unwrap_or(false);
            if flipped {
                completed += 1;
                info!(task = %task.id, "background task completed");
            }
        }
        completed
    }

    async fn fail_task(&self, id: Uuid, message: &str) {
        let flipped = self
            .store
            .persistence()
            .update_task_status(id, TaskStatus::Running, TaskStatus::Failed)
            .await
            .unwrap_or(false);
        if !flipped {
            return;
        }
        if let Ok(Some(mut task)) = self.store.persistence().get_task(id).await {
            task.error = Some(message.to_string());
            task.updated_at = chrono::Utc::now();
            if let Err(e) = self.store.persistence().save_task(&task).await {
                warn!(task = %id, "failure reason not persisted: {e}");
            }
        }
    }

    /// Resolve a target agent id: a specialist preset name, or a bare
    /// provider id (role SOLO).
    fn resolve_target(&self, agent_id: &str) -> (String, SessionRole, String) {
        match self.config.specialists.get(agent_id) {
            Some(preset) => (
                preset.provider.clone(),
                preset.role.unwrap_or(SessionRole::Solo),
                preset.system_header.clone(),
            ),
            None => (agent_id.to_string(), SessionRole::Solo, String::new()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
