// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{StopReason, UsageStats};

/// Higher-level event produced by the agent event bridge.
///
/// Where a canonical update says "tool_call id=c1 name=read", a semantic
/// event says "the agent is reading /a.ts". Consumers (orchestrator,
/// server-side waiters, UIs) subscribe to these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticEvent {
    pub session_id: Uuid,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub block: Block,
}

impl SemanticEvent {
    pub fn new(session_id: Uuid, block: Block) -> Self {
        Self { session_id, ts: Utc::now(), block }
    }
}

/// Closed set of semantic block kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum Block {
    AgentStarted,
    AgentCompleted {
        stop_reason: StopReason,
    },
    AgentFailed {
        message: String,
    },
    PlanUpdated {
        items: Vec<PlanItem>,
    },
    MessageBlock {
        text: String,
        is_chunk: bool,
    },
    ThoughtBlock {
        text: String,
        is_chunk: bool,
    },
    ReadBlock {
        tool_call_id: String,
        tool_name: String,
        status: BlockStatus,
        files: Vec<String>,
    },
    FileChangesBlock {
        tool_call_id: String,
        tool_name: String,
        status: BlockStatus,
        changes: Vec<FileChange>,
    },
    TerminalBlock {
        tool_call_id: String,
        status: BlockStatus,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    McpBlock {
        tool_call_id: String,
        tool_name: String,
        status: BlockStatus,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    ToolCallBlock {
        tool_call_id: String,
        tool_name: String,
        status: BlockStatus,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    UsageReported {
        usage: UsageStats,
    },
}

impl Block {
    /// True for the two events that end a prompt turn.
    pub fn is_turn_end(&self) -> bool {
        matches!(self, Block::AgentCompleted { .. } | Block::AgentFailed { .. })
    }
}

/// Tool-call status as shown on block events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    InProgress,
    Completed,
    Failed,
    Canceled,
}

/// One file-level change derived from an edit-kind tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Edit,
    Delete,
    Move,
}

/// Plan item with a mapped status (raw provider strings are coerced by the
/// event bridge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub title: String,
    pub status: PlanItemStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Canceled,
}

impl PlanItemStatus {
    pub fn from_raw(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "completed" | "done" => Self::Done,
            "failed" | "error" => Self::Failed,
            "in_progress" => Self::InProgress,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::Pending,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_status_mapping_covers_synonyms() {
        assert_eq!(PlanItemStatus::from_raw("completed"), PlanItemStatus::Done);
        assert_eq!(PlanItemStatus::from_raw("done"), PlanItemStatus::Done);
        assert_eq!(PlanItemStatus::from_raw("failed"), PlanItemStatus::Failed);
        assert_eq!(PlanItemStatus::from_raw("error"), PlanItemStatus::Failed);
        assert_eq!(PlanItemStatus::from_raw("in_progress"), PlanItemStatus::InProgress);
        assert_eq!(PlanItemStatus::from_raw("canceled"), PlanItemStatus::Canceled);
        assert_eq!(PlanItemStatus::from_raw("cancelled"), PlanItemStatus::Canceled);
    }

    #[test]
    fn plan_status_anything_else_is_pending() {
        assert_eq!(PlanItemStatus::from_raw(""), PlanItemStatus::Pending);
        assert_eq!(PlanItemStatus::from_raw("todo"), PlanItemStatus::Pending);
    }

    #[test]
    fn turn_end_detection() {
        assert!(Block::AgentCompleted { stop_reason: StopReason::EndTurn }.is_turn_end());
        assert!(Block::AgentFailed { message: "x".into() }.is_turn_end());
        assert!(!Block::AgentStarted.is_turn_end());
    }

    #[test]
    fn block_serialises_with_tag() {
        let ev = SemanticEvent::new(
            Uuid::new_v4(),
            Block::TerminalBlock {
                tool_call_id: "c1".into(),
                status: BlockStatus::InProgress,
                command: "npm test".into(),
                output: None,
            },
        );
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"block\":\"terminal_block\""));
        assert!(json.contains("npm test"));
        let back: SemanticEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back.block, Block::TerminalBlock { .. }));
    }
}
