// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use maestro_types::{
    Block, BlockStatus, CanonicalUpdate, ChangeType, FileChange, PlanItem, PlanItemStatus,
    SemanticEvent, ToolCallPayload, ToolCallStatus, UpdatePayload,
};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::classify::{classify_tool_kind, ToolKind};

/// Per-tool-call state carried across updates.
struct TrackedToolCall {
    name: String,
    kind: ToolKind,
    status: ToolCallStatus,
    input: Value,
    output: Option<Value>,
}

/// Stateful translator from canonical updates to semantic block events for
/// one session.
pub struct EventBridge {
    session_id: Uuid,
    tracked: HashMap<String, TrackedToolCall>,
}

impl EventBridge {
    pub fn new(session_id: Uuid) -> Self {
        Self { session_id, tracked: HashMap::new() }
    }

    /// Translate one canonical update. Most updates produce one event;
    /// `turn_complete` with usage produces two, irrelevant ones none.
    pub fn handle(&mut self, update: &CanonicalUpdate) -> Vec<SemanticEvent> {
        match &update.payload {
            UpdatePayload::ToolCall(tc) => self.on_tool_call(tc),
            UpdatePayload::ToolCallUpdate(tc) => self.on_tool_call_update(tc),
            UpdatePayload::AgentMessage(m) => vec![self.event(Block::MessageBlock {
                text: m.text.clone(),
                is_chunk: m.is_chunk,
            })],
            UpdatePayload::AgentThought(m) => vec![self.event(Block::ThoughtBlock {
                text: m.text.clone(),
                is_chunk: m.is_chunk,
            })],
            UpdatePayload::PlanUpdate { items } => {
                let items = items
                    .iter()
                    .map(|i| PlanItem {
                        title: i.title.clone(),
                        status: PlanItemStatus::from_raw(&i.status),
                    })
                    .collect();
                vec![self.event(Block::PlanUpdated { items })]
            }
            UpdatePayload::TurnComplete(tc) => {
                let mut out = Vec::new();
                if let Some(usage) = tc.usage {
                    out.push(self.event(Block::UsageReported { usage }));
                }
                out.push(self.event(Block::AgentCompleted { stop_reason: tc.stop_reason }));
                out
            }
            UpdatePayload::Error(err) => {
                vec![self.event(Block::AgentFailed { message: err.message.clone() })]
            }
            UpdatePayload::UserMessage(_) => Vec::new(),
        }
    }

    /// Discard all tracked tool calls (session delete).
    pub fn cleanup(&mut self) {
        self.tracked.clear();
    }

    /// Number of currently tracked tool calls. Exposed for memory stats.
    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    fn on_tool_call(&mut self, tc: &ToolCallPayload) -> Vec<SemanticEvent> {
        let kind = classify_tool_kind(&tc.name);
        self.tracked.insert(
            tc.id.clone(),
            TrackedToolCall {
                name: tc.name.clone(),
                kind,
                status: tc.status,
                input: tc.raw_input.clone(),
                output: tc.raw_output.clone(),
            },
        );
        // Deferred-input announcements carry nothing to show yet; the block
        // appears when the first update delivers the arguments.
        if !tc.input_finalized {
            return Vec::new();
        }
        vec![self.block_for(&tc.id, BlockStatus::InProgress)]
    }

    fn on_tool_call_update(&mut self, tc: &ToolCallPayload) -> Vec<SemanticEvent> {
        let entry = self.tracked.entry(tc.id.clone()).or_insert_with(|| {
            debug!(call = %tc.id, "tool_call_update without prior tool_call");
            TrackedToolCall {
                name: tc.name.clone(),
                kind: classify_tool_kind(&tc.name),
                status: tc.status,
                input: Value::Null,
                output: None,
            }
        });

        // Merge: new values override, missing values inherit.
        entry.status = tc.status;
        if tc.has_input() {
            entry.input = tc.raw_input.clone();
        }
        if tc.raw_output.is_some() {
            entry.output = tc.raw_output.clone();
        }

        let status = match tc.status {
            ToolCallStatus::Pending | ToolCallStatus::Running => BlockStatus::InProgress,
            ToolCallStatus::Completed => BlockStatus::Completed,
            ToolCallStatus::Failed => BlockStatus::Failed,
        };
        let event = self.block_for(&tc.id, status);
        if tc.is_terminal() {
            self.tracked.remove(&tc.id);
        }
        vec![event]
    }

    fn block_for(&self, call_id: &str, status: BlockStatus) -> SemanticEvent {
        // The entry always exists here; both callers insert before emitting.
        let entry = &self.tracked[call_id];
        let block = match entry.kind {
            ToolKind::Read => Block::ReadBlock {
                tool_call_id: call_id.to_string(),
                tool_name: entry.name.clone(),
                status,
                files: read_files(&entry.input),
            },
            ToolKind::Edit => Block::FileChangesBlock {
                tool_call_id: call_id.to_string(),
                tool_name: entry.name.clone(),
                status,
                changes: file_changes(&entry.name, &entry.input),
            },
            ToolKind::Execute => Block::TerminalBlock {
                tool_call_id: call_id.to_string(),
                status,
                command: command_from_input(&entry.input),
                output: entry.output.as_ref().map(stringify_output),
            },
            ToolKind::Mcp => Block::McpBlock {
                tool_call_id: call_id.to_string(),
                tool_name: entry.name.clone(),
                status,
                input: entry.input.clone(),
                output: entry.output.clone(),
            },
            ToolKind::Other => Block::ToolCallBlock {
                tool_call_id: call_id.to_string(),
                tool_name: entry.name.clone(),
                status,
                input: entry.input.clone(),
                output: entry.output.clone(),
            },
        };
        self.event(block)
    }

    fn event(&self, block: Block) -> SemanticEvent {
        SemanticEvent::new(self.session_id, block)
    }
}

const FILE_STRING_KEYS: &[&str] = &[
    "path", "file_path", "filePath", "file", "filename", "pattern", "glob",
];
const FILE_ARRAY_KEYS: &[&str] = &["paths", "files", "file_paths"];

/// Union of file references in a read-kind tool input, deduplicated in
/// first-seen order.
fn read_files(input: &Value) -> Vec<String> {
    let Some(obj) = input.as_object() else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::new();
    let mut push = |s: &str| {
        if !out.iter().any(|e| e == s) {
            out.push(s.to_string());
        }
    };
    for key in FILE_STRING_KEYS {
        if let Some(s) = obj.get(*key).and_then(Value::as_str) {
            push(s);
        }
    }
    for key in FILE_ARRAY_KEYS {
        if let Some(arr) = obj.get(*key).and_then(Value::as_array) {
            for item in arr.iter().filter_map(Value::as_str) {
                push(item);
            }
        }
    }
    out
}

/// Derive file changes from an edit-kind tool call.
///
/// Delete-style names map to `delete`, move/rename to `move` (with the
/// source path), and everything else — including create/write tools — to
/// `edit`; the tool name on the block records the create intent.
fn file_changes(tool_name: &str, input: &Value) -> Vec<FileChange> {
    let name = tool_name.to_ascii_lowercase();
    let change = if name == "delete" || name.starts_with("delete_") || name.contains("_delete") {
        ChangeType::Delete
    } else if name == "move" || name == "rename" {
        ChangeType::Move
    } else {
        ChangeType::Edit
    };

    let paths = read_files(input);
    let from_path = input
        .get("fromPath")
        .or_else(|| input.get("from_path"))
        .or_else(|| input.get("source"))
        .and_then(Value::as_str)
        .map(str::to_string);

    paths
        .into_iter()
        .map(|path| FileChange { path, change, from_path: from_path.clone() })
        .collect()
}

const COMMAND_KEYS: &[&str] = &["command", "cmd", "script", "shell_command"];

fn command_from_input(input: &Value) -> String {
    COMMAND_KEYS
        .iter()
        .find_map(|k| input.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

fn stringify_output(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
