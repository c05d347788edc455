// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One normalised session update.
///
/// Provider adapters turn heterogeneous wire messages into this type; it is
/// the only value that flows between the adapter layer, the trace recorder,
/// the event bridge and the session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalUpdate {
    pub session_id: Uuid,
    /// Canonical provider identifier (post synonym collapse).
    pub provider: String,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: UpdatePayload,
}

impl CanonicalUpdate {
    pub fn new(session_id: Uuid, provider: impl Into<String>, payload: UpdatePayload) -> Self {
        Self {
            session_id,
            provider: provider.into(),
            ts: Utc::now(),
            payload,
        }
    }

    /// Short kind tag, for logging.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            UpdatePayload::ToolCall(_) => "tool_call",
            UpdatePayload::ToolCallUpdate(_) => "tool_call_update",
            UpdatePayload::UserMessage(_) => "user_message",
            UpdatePayload::AgentMessage(_) => "agent_message",
            UpdatePayload::AgentThought(_) => "agent_thought",
            UpdatePayload::PlanUpdate { .. } => "plan_update",
            UpdatePayload::TurnComplete(_) => "turn_complete",
            UpdatePayload::Error(_) => "error",
        }
    }
}

/// Closed set of canonical update kinds.
///
/// Serialized with an internal `kind` tag so one history entry is a single
/// self-describing JSON object on the wire and in the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdatePayload {
    ToolCall(ToolCallPayload),
    ToolCallUpdate(ToolCallPayload),
    UserMessage(MessagePayload),
    AgentMessage(MessagePayload),
    AgentThought(MessagePayload),
    PlanUpdate { items: Vec<RawPlanItem> },
    TurnComplete(TurnCompletePayload),
    Error(ErrorPayload),
}

/// Tool-call payload shared by `tool_call` and `tool_call_update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallPayload {
    /// Provider-assigned identifier, forwarded verbatim.
    pub id: String,
    pub name: String,
    pub status: ToolCallStatus,
    /// Raw tool arguments as the provider sent them. `Null` when unknown.
    #[serde(default)]
    pub raw_input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
    /// False while the provider has announced the call but not yet its
    /// arguments (deferred-input providers). The trace recorder holds the
    /// call pending until this flips.
    pub input_finalized: bool,
}

impl ToolCallPayload {
    pub fn announced(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ToolCallStatus::Pending,
            raw_input: input,
            raw_output: None,
            input_finalized: true,
        }
    }

    /// True once the upstream reported a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ToolCallStatus::Completed | ToolCallStatus::Failed
        )
    }

    /// True if `raw_input` carries any actual argument data.
    pub fn has_input(&self) -> bool {
        match &self.raw_input {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ToolCallStatus {
    /// Coerce an upstream status string to the canonical set.
    ///
    /// `has_output` marks messages that carry a result payload; those imply
    /// completion even when the status string is missing or unknown.
    pub fn coerce(raw: Option<&str>, has_output: bool) -> Self {
        match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("pending") | Some("queued") => Self::Pending,
            Some("running") | Some("in_progress") | Some("started") => Self::Running,
            Some("completed") | Some("complete") | Some("done") | Some("success") => {
                Self::Completed
            }
            Some("failed") | Some("error") => Self::Failed,
            _ if has_output => Self::Completed,
            _ => Self::Pending,
        }
    }
}

/// Message payload for user/agent/thought text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: String,
    /// True when this entry is one fragment of a streamed message. The store
    /// keeps chunks verbatim; `consolidate_history` merges them on demand.
    #[serde(default)]
    pub is_chunk: bool,
}

impl MessagePayload {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_chunk: true }
    }

    pub fn whole(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_chunk: false }
    }
}

/// Plan item as the provider reported it; the event bridge maps the raw
/// status string into [`crate::PlanItemStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPlanItem {
    pub title: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnCompletePayload {
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Error surfaced through the canonical stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

/// Wire-visible error kinds (see the runtime error taxonomy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    NotInitialized,
    SessionNotFound,
    UpstreamUnavailable,
    UpstreamExited,
    Cancelled,
    Timeout,
    ParseError,
    SubscriberError,
    PersistenceError,
}

/// Merge every maximal run of agent-message chunks into one whole message.
///
/// Non-chunk entries keep their positions; the merged message takes the
/// position (and timestamp/provider) of the first chunk in its run.
pub fn consolidate_history(history: &[CanonicalUpdate]) -> Vec<CanonicalUpdate> {
    let mut out: Vec<CanonicalUpdate> = Vec::with_capacity(history.len());
    for entry in history {
        if let UpdatePayload::AgentMessage(msg) = &entry.payload {
            if let Some(last) = out.last_mut() {
                if let UpdatePayload::AgentMessage(prev) = &mut last.payload {
                    prev.text.push_str(&msg.text);
                    prev.is_chunk = false;
                    continue;
                }
            }
            let mut merged = entry.clone();
            merged.payload = UpdatePayload::AgentMessage(MessagePayload::whole(msg.text.clone()));
            out.push(merged);
            continue;
        }
        out.push(entry.clone());
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(payload: UpdatePayload) -> CanonicalUpdate {
        CanonicalUpdate::new(Uuid::new_v4(), "generic", payload)
    }

    // ── Status coercion ──────────────────────────────────────────────────────

    #[test]
    fn coerce_known_statuses() {
        assert_eq!(ToolCallStatus::coerce(Some("pending"), false), ToolCallStatus::Pending);
        assert_eq!(ToolCallStatus::coerce(Some("in_progress"), false), ToolCallStatus::Running);
        assert_eq!(ToolCallStatus::coerce(Some("done"), false), ToolCallStatus::Completed);
        assert_eq!(ToolCallStatus::coerce(Some("error"), false), ToolCallStatus::Failed);
    }

    #[test]
    fn coerce_is_case_insensitive() {
        assert_eq!(ToolCallStatus::coerce(Some("Completed"), false), ToolCallStatus::Completed);
        assert_eq!(ToolCallStatus::coerce(Some("FAILED"), false), ToolCallStatus::Failed);
    }

    #[test]
    fn coerce_output_presence_implies_completion() {
        assert_eq!(ToolCallStatus::coerce(None, true), ToolCallStatus::Completed);
        assert_eq!(ToolCallStatus::coerce(Some("weird"), true), ToolCallStatus::Completed);
    }

    #[test]
    fn coerce_unknown_without_output_is_pending() {
        assert_eq!(ToolCallStatus::coerce(Some("weird"), false), ToolCallStatus::Pending);
        assert_eq!(ToolCallStatus::coerce(None, false), ToolCallStatus::Pending);
    }

    // ── Tool-call payload helpers ────────────────────────────────────────────

    #[test]
    fn has_input_false_for_null_and_empty_object() {
        let mut tc = ToolCallPayload::announced("c1", "read", Value::Null);
        assert!(!tc.has_input());
        tc.raw_input = json!({});
        assert!(!tc.has_input());
        tc.raw_input = json!({"path": "/a"});
        assert!(tc.has_input());
    }

    #[test]
    fn is_terminal_only_for_completed_and_failed() {
        let mut tc = ToolCallPayload::announced("c1", "read", Value::Null);
        assert!(!tc.is_terminal());
        tc.status = ToolCallStatus::Completed;
        assert!(tc.is_terminal());
        tc.status = ToolCallStatus::Failed;
        assert!(tc.is_terminal());
    }

    // ── Serialisation ────────────────────────────────────────────────────────

    #[test]
    fn canonical_update_round_trips_through_json() {
        let u = update(UpdatePayload::AgentMessage(MessagePayload::chunk("hi")));
        let json = serde_json::to_string(&u).unwrap();
        assert!(json.contains("\"kind\":\"agent_message\""));
        let back: CanonicalUpdate = serde_json::from_str(&json).unwrap();
        match back.payload {
            UpdatePayload::AgentMessage(m) => {
                assert_eq!(m.text, "hi");
                assert!(m.is_chunk);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn error_kind_serialises_snake_case() {
        let s = serde_json::to_string(&ErrorKind::UpstreamExited).unwrap();
        assert_eq!(s, "\"upstream_exited\"");
    }

    // ── Consolidation ────────────────────────────────────────────────────────

    #[test]
    fn consolidate_merges_chunk_run_into_one_message() {
        let sid = Uuid::new_v4();
        let history: Vec<CanonicalUpdate> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|t| {
                CanonicalUpdate::new(sid, "generic", UpdatePayload::AgentMessage(MessagePayload::chunk(*t)))
            })
            .collect();
        let merged = consolidate_history(&history);
        assert_eq!(merged.len(), 1);
        match &merged[0].payload {
            UpdatePayload::AgentMessage(m) => {
                assert_eq!(m.text, "abcde");
                assert!(!m.is_chunk);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn consolidate_preserves_non_chunk_ordering() {
        let sid = Uuid::new_v4();
        let history = vec![
            CanonicalUpdate::new(sid, "generic", UpdatePayload::AgentMessage(MessagePayload::chunk("a"))),
            CanonicalUpdate::new(sid, "generic", UpdatePayload::UserMessage(MessagePayload::whole("q"))),
            CanonicalUpdate::new(sid, "generic", UpdatePayload::AgentMessage(MessagePayload::chunk("b"))),
            CanonicalUpdate::new(sid, "generic", UpdatePayload::AgentMessage(MessagePayload::chunk("c"))),
        ];
        let merged = consolidate_history(&history);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].kind(), "agent_message");
        assert_eq!(merged[1].kind(), "user_message");
        match &merged[2].payload {
            UpdatePayload::AgentMessage(m) => assert_eq!(m.text, "bc"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn consolidate_empty_history_is_empty() {
        assert!(consolidate_history(&[]).is_empty());
    }
}
