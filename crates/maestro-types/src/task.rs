// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deferred user request held in the background queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: Uuid,
    pub workspace_id: String,
    /// Target agent: a provider id or a specialist preset name.
    pub agent_id: String,
    pub prompt: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub progress: TaskProgress,
}

impl BackgroundTask {
    pub fn new(
        workspace_id: impl Into<String>,
        agent_id: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            agent_id: agent_id.into(),
            prompt: prompt.into(),
            status: TaskStatus::Pending,
            session_id: None,
            error: None,
            created_at: now,
            updated_at: now,
            progress: TaskProgress::default(),
        }
    }
}

/// The only legal orderings are PENDING → RUNNING → (COMPLETED | FAILED)
/// and PENDING → FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether `self → to` is a legal transition.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }
}

/// Live progress counters for a task-bound session. Updated on every
/// canonical update; losing one update is acceptable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    pub tool_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// One task parsed out of a `@@@task` fenced block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTask {
    /// Raw text of the first `#` heading (inline Markdown preserved).
    pub title: String,
    /// The full block body as written.
    pub text: String,
    pub sections: TaskSections,
}

/// Named `##` sections of a task block. Absent sections stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSections {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_of_done: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_required: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
