// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maestro_types::{
    BackgroundTask, CanonicalUpdate, Error, Result, SessionRecord, TaskStatus, Workspace,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form note scoped to a workspace (consumed by orchestration helpers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub workspace_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// The pluggable durability boundary.
///
/// The live pipeline never blocks on this: callers treat every failure as a
/// logged `persistence_error` and carry on. Drivers other than the
/// in-memory one live outside this repository.
#[async_trait]
pub trait Persistence: Send + Sync {
    // ── Sessions ─────────────────────────────────────────────────────────────
    async fn save_session(&self, session: &SessionRecord) -> Result<()>;
    async fn delete_session(&self, id: Uuid) -> Result<()>;
    async fn rename_session(&self, id: Uuid, title: &str) -> Result<()>;
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>>;
    async fn get_session(&self, id: Uuid) -> Result<Option<SessionRecord>>;

    // ── History ──────────────────────────────────────────────────────────────
    async fn save_history(&self, id: Uuid, history: &[CanonicalUpdate]) -> Result<()>;
    async fn load_history(&self, id: Uuid) -> Result<Vec<CanonicalUpdate>>;

    // ── Background tasks ─────────────────────────────────────────────────────
    async fn save_task(&self, task: &BackgroundTask) -> Result<()>;
    async fn list_tasks(&self, workspace: Option<&str>) -> Result<Vec<BackgroundTask>>;
    async fn get_task(&self, id: Uuid) -> Result<Option<BackgroundTask>>;
    /// Atomically flip `from → to`; returns false when another worker won.
    async fn update_task_status(&self, id: Uuid, from: TaskStatus, to: TaskStatus)
        -> Result<bool>;
    async fn find_task_by_session(&self, session_id: Uuid) -> Result<Option<BackgroundTask>>;

    // ── Workspaces and notes ─────────────────────────────────────────────────
    async fn save_workspace(&self, workspace: &Workspace) -> Result<()>;
    async fn list_workspaces(&self) -> Result<Vec<Workspace>>;
    async fn save_note(&self, note: &Note) -> Result<()>;
    async fn list_notes(&self, workspace: &str) -> Result<Vec<Note>>;
}

/// In-memory driver: the default, and the reference for driver semantics.
#[derive(Default)]
pub struct MemoryPersistence {
    sessions: Mutex<HashMap<Uuid, SessionRecord>>,
    history: Mutex<HashMap<Uuid, Vec<CanonicalUpdate>>>,
    tasks: Mutex<HashMap<Uuid, BackgroundTask>>,
    workspaces: Mutex<HashMap<String, Workspace>>,
    notes: Mutex<Vec<Note>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<'a, T>(&self, m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        m.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn save_session(&self, session: &SessionRecord) -> Result<()> {
        self.lock(&self.sessions).insert(session.id, session.clone());
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> Result<()> {
        self.lock(&self.sessions).remove(&id);
        self.lock(&self.history).remove(&id);
        Ok(())
    }

    async fn rename_session(&self, id: Uuid, title: &str) -> Result<()> {
        match self.lock(&self.sessions).get_mut(&id) {
            Some(s) => {
                s.title = Some(title.to_string());
                Ok(())
            }
            None => Err(Error::SessionNotFound(id)),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.lock(&self.sessions).values().cloned().collect())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<SessionRecord>> {
        Ok(self.lock(&self.sessions).get(&id).cloned())
    }

    async fn save_history(&self, id: Uuid, history: &[CanonicalUpdate]) -> Result<()> {
        self.lock(&self.history).insert(id, history.to_vec());
        Ok(())
    }

    async fn load_history(&self, id: Uuid) -> Result<Vec<CanonicalUpdate>> {
        Ok(self.lock(&self.history).get(&id).cloned().unwrap_or_default())
    }

    async fn save_task(&self, task: &BackgroundTask) -> Result<()> {
        self.lock(&self.tasks).insert(task.id, task.clone());
        Ok(())
    }

    async fn list_tasks(&self, workspace: Option<&str>) -> Result<Vec<BackgroundTask>> {
        let mut tasks: Vec<BackgroundTask> = self
            .lock(&self.tasks)
            .values()
            .filter(|t| workspace.map_or(true, |w| t.workspace_id == w))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<BackgroundTask>> {
        Ok(self.lock(&self.tasks).get(&id).cloned())
    }

    async fn update_task_status(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool> {
        let mut tasks = self.lock(&self.tasks);
        match tasks.get_mut(&id) {
            Some(t) if t.status == from => {
                t.status = to;
                t.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(Error::Persistence(format!("task {id} not found"))),
        }
    }

    async fn find_task_by_session(&self, session_id: Uuid) -> Result<Option<BackgroundTask>> {
        Ok(self
            .lock(&self.tasks)
            .values()
            .find(|t| t.session_id == Some(session_id))
            .cloned())
    }

    async fn save_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.lock(&self.workspaces).insert(workspace.id.clone(), workspace.clone());
        Ok(())
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        Ok(self.lock(&self.workspaces).values().cloned().collect())
    }

    async fn save_note(&self, note: &Note) -> Result<()> {
        self.lock(&self.notes).push(note.clone());
        Ok(())
    }

    async fn list_notes(&self, workspace: &str) -> Result<Vec<Note>> {
        Ok(self
            .lock(&self.notes)
            .iter()
            .filter(|n| n.workspace_id == workspace)
            .cloned()
            .collect())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::SessionRole;

    #[tokio::test]
    async fn session_save_get_delete_round_trip() {
        let p = MemoryPersistence::new();
        let s = SessionRecord::new("ws", "/tmp", "claude", SessionRole::Solo);
        p.save_session(&s).await.unwrap();
        assert!(p.get_session(s.id).await.unwrap().is_some());
        p.delete_session(s.id).await.unwrap();
        assert!(p.get_session(s.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rename_missing_session_errors() {
        let p = MemoryPersistence::new();
        assert!(matches!(
            p.rename_session(Uuid::new_v4(), "x").await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn task_status_flip_is_optimistic() {
        let p = MemoryPersistence::new();
        let t = BackgroundTask::new("ws", "claude", "prompt");
        p.save_task(&t).await.unwrap();

        assert!(p
            .update_task_status(t.id, TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap());
        // Second claim loses the race.
        assert!(!p
            .update_task_status(t.id, TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn tasks_list_oldest_first_and_filter_by_workspace() {
        let p = MemoryPersistence::new();
        let mut a = BackgroundTask::new("ws1", "claude", "a");
        a.created_at = Utc::now() - chrono::Duration::seconds(10);
        let b = BackgroundTask::new("ws1", "claude", "b");
        let c = BackgroundTask::new("ws2", "claude", "c");
        for t in [&a, &b, &c] {
            p.save_task(t).await.unwrap();
        }
        let ws1 = p.list_tasks(Some("ws1")).await.unwrap();
        assert_eq!(ws1.len(), 2);
        assert_eq!(ws1[0].id, a.id, "oldest first");
    }

    #[tokio::test]
    async fn find_task_by_session() {
        let p = MemoryPersistence::new();
        let sid = Uuid::new_v4();
        let mut t = BackgroundTask::new("ws", "claude", "p");
        t.session_id = Some(sid);
        p.save_task(&t).await.unwrap();
        assert_eq!(p.find_task_by_session(sid).await.unwrap().unwrap().id, t.id);
        assert!(p.find_task_by_session(Uuid::new_v4()).await.unwrap().is_none());
    }
}
