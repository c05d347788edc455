// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use maestro_types::ToolCallStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::vcs::VcsContext;

/// One entry in the trace journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub session_id: Uuid,
    pub event: TraceEvent,
    /// Provider that contributed this trace.
    pub contributor: String,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationSection>,
    /// Best-effort VCS snapshot at trace time; absence means the lookup was
    /// skipped or failed, never that recording failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs: Option<VcsContext>,
    /// File paths mined from tool input (best-effort).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl TraceRecord {
    pub fn new(session_id: Uuid, contributor: impl Into<String>, event: TraceEvent) -> Self {
        Self {
            session_id,
            event,
            contributor: contributor.into(),
            ts: Utc::now(),
            tool: None,
            conversation: None,
            vcs: None,
            files: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: ToolSection) -> Self {
        self.tool = Some(tool);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.conversation = Some(ConversationSection { text: text.into() });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEvent {
    ToolCall,
    ToolResult,
    AgentMessage,
    AgentThought,
    UserMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSection {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolCallStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSection {
    pub text: String,
}
