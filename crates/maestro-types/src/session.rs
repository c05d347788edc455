// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level tenant boundary. Sessions, tasks and notes all scope to one
/// workspace; deleting a workspace cascades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub title: String,
    pub status: WorkspaceStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Active,
    Archived,
}

/// What a session's specialist is expected to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionRole {
    /// Plans the work and delegates sub-tasks to children.
    Coordinator,
    /// Writes code for one delegated sub-task.
    Implementor,
    /// Reviews a sibling implementor's output.
    Verifier,
    /// Does everything in one session (no delegation).
    Solo,
}

impl std::fmt::Display for SessionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionRole::Coordinator => "COORDINATOR",
            SessionRole::Implementor => "IMPLEMENTOR",
            SessionRole::Verifier => "VERIFIER",
            SessionRole::Solo => "SOLO",
        };
        write!(f, "{s}")
    }
}

/// One conversational thread with one upstream specialist process.
///
/// `provider`, `role` and `workspace_id` are immutable after creation;
/// `parent` links child sessions spawned by delegation (the parent/child
/// relation forms an acyclic forest because a child is always created after
/// its parent and never re-parented).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub workspace_id: String,
    pub cwd: PathBuf,
    pub provider: String,
    pub role: SessionRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub first_prompt_sent: bool,
    /// Pre-built system prompt header injected ahead of the first prompt.
    #[serde(default)]
    pub system_header: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form operating mode hint (mutable metadata).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl SessionRecord {
    pub fn new(
        workspace_id: impl Into<String>,
        cwd: impl Into<PathBuf>,
        provider: impl Into<String>,
        role: SessionRole,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            cwd: cwd.into(),
            provider: provider.into(),
            role,
            specialist: None,
            parent: None,
            created_at: Utc::now(),
            first_prompt_sent: false,
            system_header: String::new(),
            title: None,
            mode: None,
        }
    }

    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_specialist(mut self, specialist: impl Into<String>) -> Self {
        self.specialist = Some(specialist.into());
        self
    }

    pub fn with_system_header(mut self, header: impl Into<String>) -> Self {
        self.system_header = header.into();
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sessions_get_unique_ids() {
        let a = SessionRecord::new("ws", "/tmp", "claude", SessionRole::Solo);
        let b = SessionRecord::new("ws", "/tmp", "claude", SessionRole::Solo);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn role_serialises_uppercase() {
        let s = serde_json::to_string(&SessionRole::Coordinator).unwrap();
        assert_eq!(s, "\"COORDINATOR\"");
    }

    #[test]
    fn builder_sets_parent_and_specialist() {
        let parent = Uuid::new_v4();
        let s = SessionRecord::new("ws", "/tmp", "codex", SessionRole::Implementor)
            .with_parent(parent)
            .with_specialist("rust-impl");
        assert_eq!(s.parent, Some(parent));
        assert_eq!(s.specialist.as_deref(), Some("rust-impl"));
    }

    #[test]
    fn record_round_trips_without_optional_fields() {
        let s = SessionRecord::new("ws", "/tmp", "claude", SessionRole::Solo);
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("\"parent\""));
        let back: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, s.id);
        assert!(!back.first_prompt_sent);
    }
}
