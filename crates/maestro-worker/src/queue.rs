// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use maestro_store::Persistence;
use maestro_types::{BackgroundTask, Error, Result, TaskStatus};
use tracing::info;
use uuid::Uuid;

/// Durable queue of deferred user requests.
#[derive(Clone)]
pub struct TaskQueue {
    persistence: Arc<dyn Persistence>,
}

impl TaskQueue {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Persist a new PENDING task and return its id.
    pub async fn enqueue(
        &self,
        workspace: &str,
        agent_id: &str,
        prompt: &str,
    ) -> Result<Uuid> {
        let task = BackgroundTask::new(workspace, agent_id, prompt);
        let id = task.id;
        self.persistence.save_task(&task).await?;
        info!(task = %id, workspace, agent = agent_id, "background task enqueued");
        Ok(id)
    }

    pub async fn list(&self, workspace: Option<&str>) -> Result<Vec<BackgroundTask>> {
        self.persistence.list_tasks(workspace).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<BackgroundTask>> {
        self.persistence.get_task(id).await
    }

    /// Cancel a task. A PENDING task fails immediately; a RUNNING one is
    /// marked failed (its session, if any, is reaped by normal means).
    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        let Some(mut task) = self.persistence.get_task(id).await? else {
            return Err(Error::InvalidRequest(format!("unknown task {id}")));
        };
        match task.status {
            TaskStatus::Pending | TaskStatus::Running => {
                task.status = TaskStatus::Failed;
                task.error = Some("cancelled".into());
                task.updated_at = chrono::Utc::now();
                self.persistence.save_task(&task).await
            }
            TaskStatus::Completed | TaskStatus::Failed => Err(Error::InvalidRequest(format!(
                "task {id} already finished"
            ))),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_store::MemoryPersistence;

    fn queue() -> TaskQueue {
        TaskQueue::new(Arc::new(MemoryPersistence::new()))
    }

    #[tokio::test]
    async fn enqueue_creates_pending_task() {
        let q = queue();
        let id = q.enqueue("ws", "claude", "fix the bug").await.unwrap();
        let task = q.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.prompt, "fix the bug");
    }

    #[tokio::test]
    async fn cancel_pending_fails_the_task() {
        let q = queue();
        let id = q.enqueue("ws", "claude", "x").await.unwrap();
        q.cancel(id).await.unwrap();
        let task = q.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn cancel_finished_task_is_rejected() {
        let q = queue();
        let id = q.enqueue("ws", "claude", "x").await.unwrap();
        q.cancel(id).await.unwrap();
        assert!(q.cancel(id).await.is_err());
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_rejected() {
        let q = queue();
        assert!(q.cancel(Uuid::new_v4()).await.is_err());
    }
}
