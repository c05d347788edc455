// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use maestro_types::{CanonicalUpdate, ToolCallPayload, Tunables, UpdatePayload};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::record::{ToolSection, TraceEvent, TraceRecord};
use crate::sink::TraceSink;
use crate::vcs::{file_paths_from_input, vcs_snapshot};

/// Tool call announced without finalised arguments, awaiting a later update.
struct PendingToolCall {
    name: String,
    input: Value,
    #[allow(dead_code)]
    since: DateTime<Utc>,
    finalized: bool,
}

#[derive(Default)]
struct SessionTraceState {
    pending: HashMap<String, PendingToolCall>,
    /// Call ids for which a `tool_call` trace has been emitted.
    emitted_calls: HashSet<String>,
    /// Call ids for which a `tool_result` trace has been emitted.
    emitted_results: HashSet<String>,
    message_buf: String,
    thought_buf: String,
    /// Last provider seen; used when flushing without a triggering update.
    provider: String,
}

/// Reassembles complete tool-call pairs and prose traces from the canonical
/// stream and writes them to a [`TraceSink`].
pub struct TraceRecorder {
    sink: Arc<dyn TraceSink>,
    flush_chars: usize,
    git_budget: Duration,
    vcs_enabled: bool,
    sessions: Mutex<HashMap<Uuid, SessionTraceState>>,
}

impl TraceRecorder {
    pub fn new(sink: Arc<dyn TraceSink>, tunables: &Tunables) -> Self {
        Self {
            sink,
            flush_chars: tunables.message_flush_chars,
            git_budget: tunables.git_timeout(),
            vcs_enabled: true,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Disable the best-effort VCS snapshot (tests, bare deployments).
    pub fn without_vcs(mut self) -> Self {
        self.vcs_enabled = false;
        self
    }

    /// Feed one canonical update. `cwd` enables the VCS snapshot on
    /// tool-call traces when set.
    pub async fn record(&self, update: &CanonicalUpdate, cwd: Option<&Path>) {
        let records = {
            let mut sessions = self.lock_sessions();
            let state = sessions.entry(update.session_id).or_default();
            state.provider = update.provider.clone();
            self.apply(state, update)
        };
        self.emit(records, cwd).await;
    }

    /// Drain any buffered prose for a session (end of prompt / session).
    pub async fn flush_session(&self, session_id: Uuid) {
        let records = {
            let mut sessions = self.lock_sessions();
            match sessions.get_mut(&session_id) {
                Some(state) => flush_buffers(session_id, state),
                None => Vec::new(),
            }
        };
        self.emit(records, None).await;
    }

    /// Discard all state for a session, silently.
    pub fn remove_session(&self, session_id: Uuid) {
        self.lock_sessions().remove(&session_id);
    }

    /// Number of sessions with pending (unfinalised) tool calls. Exposed for
    /// memory statistics.
    pub fn pending_sessions(&self) -> usize {
        self.lock_sessions()
            .values()
            .filter(|s| !s.pending.is_empty())
            .count()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<Uuid, SessionTraceState>> {
        // A poisoned lock only means a panic elsewhere mid-insert; the map
        // itself is still usable.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pure state transition: one update in, trace records out.
    fn apply(&self, state: &mut SessionTraceState, update: &CanonicalUpdate) -> Vec<TraceRecord> {
        let sid = update.session_id;
        let provider = update.provider.as_str();
        let mut out = Vec::new();

        match &update.payload {
            UpdatePayload::AgentMessage(m) if m.is_chunk => {
                state.message_buf.push_str(&m.text);
                if state.message_buf.len() >= self.flush_chars {
                    out.extend(flush_one(
                        sid,
                        provider,
                        &mut state.message_buf,
                        TraceEvent::AgentMessage,
                    ));
                }
            }
            UpdatePayload::AgentThought(m) if m.is_chunk => {
                state.thought_buf.push_str(&m.text);
                if state.thought_buf.len() >= self.flush_chars {
                    out.extend(flush_one(
                        sid,
                        provider,
                        &mut state.thought_buf,
                        TraceEvent::AgentThought,
                    ));
                }
            }
            UpdatePayload::AgentMessage(m) => {
                out.extend(flush_buffers(sid, state));
                out.push(TraceRecord::new(sid, provider, TraceEvent::AgentMessage).with_text(&m.text));
            }
            UpdatePayload::AgentThought(m) => {
                out.extend(flush_buffers(sid, state));
                out.push(TraceRecord::new(sid, provider, TraceEvent::AgentThought).with_text(&m.text));
            }
            UpdatePayload::UserMessage(m) => {
                out.extend(flush_buffers(sid, state));
                out.push(TraceRecord::new(sid, provider, TraceEvent::UserMessage).with_text(&m.text));
            }
            UpdatePayload::ToolCall(tc) => {
                out.extend(flush_buffers(sid, state));
                out.extend(self.on_tool_call(state, sid, provider, tc));
            }
            UpdatePayload::ToolCallUpdate(tc) => {
                out.extend(flush_buffers(sid, state));
                out.extend(self.on_tool_call_update(state, sid, provider, tc));
            }
            UpdatePayload::PlanUpdate { .. }
            | UpdatePayload::TurnComplete(_)
            | UpdatePayload::Error(_) => {
                out.extend(flush_buffers(sid, state));
            }
        }
        out
    }

    fn on_tool_call(
        &self,
        state: &mut SessionTraceState,
        sid: Uuid,
        provider: &str,
        tc: &ToolCallPayload,
    ) -> Vec<TraceRecord> {
        if tc.input_finalized {
            if state.emitted_calls.contains(&tc.id) {
                debug!(call = %tc.id, "duplicate tool_call ignored");
                return Vec::new();
            }
            state.emitted_calls.insert(tc.id.clone());
            return vec![tool_call_record(
                sid,
                provider,
                tc.id.clone(),
                tc.name.clone(),
                tc.raw_input.clone(),
                tc,
            )];
        }

        // Deferred input: park the announcement, emit nothing.
        state
            .pending
            .entry(tc.id.clone())
            .or_insert_with(|| PendingToolCall {
                name: tc.name.clone(),
                input: tc.raw_input.clone(),
                since: Utc::now(),
                finalized: false,
            });
        Vec::new()
    }

    fn on_tool_call_update(
        &self,
        state: &mut SessionTraceState,
        sid: Uuid,
        provider: &str,
        tc: &ToolCallPayload,
    ) -> Vec<TraceRecord> {
        let mut out = Vec::new();
        let adapter = maestro_adapters::adapter_for(provider);
        let completes = tc.is_terminal() || tc.raw_output.is_some();

        if let Some(pending) = state.pending.get_mut(&tc.id) {
            if let Some(input) = adapter.resolve_deferred_input(tc) {
                pending.input = input;
                pending.finalized = true;
            } else if tc.input_finalized {
                // Completion without arguments: the input is final (empty).
                pending.finalized = true;
            }
            let name = pending.name.clone();
            let input = pending.input.clone();
            let finalized = pending.finalized;

            if finalized && !state.emitted_calls.contains(&tc.id) {
                state.emitted_calls.insert(tc.id.clone());
                out.push(tool_call_record(sid, provider, tc.id.clone(), name.clone(), input, tc));
            }
            if completes {
                if !state.emitted_results.contains(&tc.id) {
                    state.emitted_results.insert(tc.id.clone());
                    out.push(tool_result_record(sid, provider, tc.id.clone(), name, tc));
                }
                state.pending.remove(&tc.id);
            }
            return out;
        }

        // No pending entry: the announcement either carried its input
        // (already traced) or was never seen. Emit the result, best-effort.
        if completes && !state.emitted_results.contains(&tc.id) {
            state.emitted_results.insert(tc.id.clone());
            out.push(tool_result_record(sid, provider, tc.id.clone(), tc.name.clone(), tc));
        }
        out
    }

    async fn emit(&self, mut records: Vec<TraceRecord>, cwd: Option<&Path>) {
        if records.is_empty() {
            return;
        }
        // VCS context is attached to tool-call traces only, outside any lock.
        if self.vcs_enabled {
            if let Some(cwd) = cwd {
                let needs_vcs = records.iter().any(|r| r.event == TraceEvent::ToolCall);
                if needs_vcs {
                    let snapshot = vcs_snapshot(cwd, self.git_budget).await;
                    for r in records.iter_mut().filter(|r| r.event == TraceEvent::ToolCall) {
                        r.vcs = snapshot.clone();
                    }
                }
            }
        }
        for record in &records {
            if let Err(e) = self.sink.write(record).await {
                warn!(session = %record.session_id, "trace sink write failed: {e}");
            }
        }
    }
}

fn tool_call_record(
    sid: Uuid,
    provider: &str,
    call_id: String,
    name: String,
    input: Value,
    tc: &ToolCallPayload,
) -> TraceRecord {
    let files = file_paths_from_input(&input);
    let mut record = TraceRecord::new(sid, provider, TraceEvent::ToolCall).with_tool(ToolSection {
        call_id,
        name,
        input,
        output: None,
        status: Some(tc.status),
    });
    record.files = files;
    record
}

fn tool_result_record(
    sid: Uuid,
    provider: &str,
    call_id: String,
    name: String,
    tc: &ToolCallPayload,
) -> TraceRecord {
    TraceRecord::new(sid, provider, TraceEvent::ToolResult).with_tool(ToolSection {
        call_id,
        name,
        input: Value::Null,
        output: tc.raw_output.clone(),
        status: Some(tc.status),
    })
}

fn flush_buffers(sid: Uuid, state: &mut SessionTraceState) -> Vec<TraceRecord> {
    let provider = state.provider.clone();
    let mut out = Vec::new();
    out.extend(flush_one(sid, &provider, &mut state.message_buf, TraceEvent::AgentMessage));
    out.extend(flush_one(sid, &provider, &mut state.thought_buf, TraceEvent::AgentThought));
    out
}

fn flush_one(
    sid: Uuid,
    provider: &str,
    buf: &mut String,
    event: TraceEvent,
) -> Option<TraceRecord> {
    if buf.is_empty() {
        return None;
    }
    let text = std::mem::take(buf);
    Some(TraceRecord::new(sid, provider, event).with_text(text))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemoryTraceSink;
    use maestro_types::{MessagePayload, ToolCallStatus};
    use serde_json::json;

    fn recorder(sink: Arc<MemoryTraceSink>) -> TraceRecorder {
        TraceRecorder::new(sink, &Tunables::default()).without_vcs()
    }

    fn tool_call(sid: Uuid, provider: &str, id: &str, input: Value, finalized: bool) -> CanonicalUpdate {
        CanonicalUpdate::new(
            sid,
            provider,
            UpdatePayload::ToolCall(ToolCallPayload {
                id: id.into(),
                name: "read".into(),
                status: ToolCallStatus::Pending,
                raw_input: input,
                raw_output: None,
                input_finalized: finalized,
            }),
        )
    }

    fn tool_update(
        sid: Uuid,
        provider: &str,
        id: &str,
        input: Value,
        output: Option<Value>,
        status: ToolCallStatus,
    ) -> CanonicalUpdate {
        CanonicalUpdate::new(
            sid,
            provider,
            UpdatePayload::ToolCallUpdate(ToolCallPayload {
                id: id.into(),
                name: "read".into(),
                status,
                raw_input: input.clone(),
                raw_output: output,
                input_finalized: !input.is_null() || status == ToolCallStatus::Completed,
            }),
        )
    }

    // ── Immediate input ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn immediate_input_emits_call_then_result() {
        let sink = Arc::new(MemoryTraceSink::new());
        let r = recorder(sink.clone());
        let sid = Uuid::new_v4();

        r.record(&tool_call(sid, "claude", "c2", json!({"command": "npm test"}), true), None)
            .await;
        r.record(
            &tool_update(sid, "claude", "c2", Value::Null, Some(json!("ok")), ToolCallStatus::Completed),
            None,
        )
        .await;

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, TraceEvent::ToolCall);
        assert_eq!(records[1].event, TraceEvent::ToolResult);
        let tool = records[0].tool.as_ref().unwrap();
        assert_eq!(tool.input["command"], "npm test");
    }

    // ── Deferred input ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn deferred_input_holds_trace_until_finalized() {
        let sink = Arc::new(MemoryTraceSink::new());
        let r = recorder(sink.clone());
        let sid = Uuid::new_v4();

        r.record(&tool_call(sid, "codex", "c1", json!({}), false), None).await;
        assert!(sink.records().is_empty(), "no trace before input is known");

        r.record(
            &tool_update(sid, "codex", "c1", json!({"filePath": "/a.ts"}), None, ToolCallStatus::Running),
            None,
        )
        .await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, TraceEvent::ToolCall);
        assert_eq!(records[0].tool.as_ref().unwrap().input["filePath"], "/a.ts");
        assert_eq!(records[0].files, vec!["/a.ts"]);

        r.record(
            &tool_update(sid, "codex", "c1", Value::Null, Some(json!("…")), ToolCallStatus::Completed),
            None,
        )
        .await;
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].event, TraceEvent::ToolResult);
    }

    #[tokio::test]
    async fn completion_without_input_still_closes_the_pair() {
        let sink = Arc::new(MemoryTraceSink::new());
        let r = recorder(sink.clone());
        let sid = Uuid::new_v4();

        r.record(&tool_call(sid, "codex", "c1", json!({}), false), None).await;
        // Completion arrives before any input was ever reported.
        r.record(
            &tool_update(sid, "codex", "c1", json!({}), Some(json!("out")), ToolCallStatus::Completed),
            None,
        )
        .await;

        let records = sink.records();
        // The completion finalises the (empty) input: one call, one result.
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, TraceEvent::ToolCall);
        assert_eq!(records[1].event, TraceEvent::ToolResult);
    }

    // ── Dedup ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn duplicate_updates_do_not_duplicate_traces() {
        let sink = Arc::new(MemoryTraceSink::new());
        let r = recorder(sink.clone());
        let sid = Uuid::new_v4();

        let call = tool_call(sid, "claude", "c1", json!({"path": "/x"}), true);
        r.record(&call, None).await;
        r.record(&call, None).await;
        let done = tool_update(sid, "claude", "c1", Value::Null, Some(json!("ok")), ToolCallStatus::Completed);
        r.record(&done, None).await;
        r.record(&done, None).await;

        let records = sink.records();
        let calls = records.iter().filter(|r| r.event == TraceEvent::ToolCall).count();
        let results = records.iter().filter(|r| r.event == TraceEvent::ToolResult).count();
        assert_eq!(calls, 1);
        assert_eq!(results, 1);
    }

    #[tokio::test]
    async fn orphan_update_emits_result_only() {
        let sink = Arc::new(MemoryTraceSink::new());
        let r = recorder(sink.clone());
        let sid = Uuid::new_v4();

        r.record(
            &tool_update(sid, "claude", "ghost", Value::Null, Some(json!("out")), ToolCallStatus::Completed),
            None,
        )
        .await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, TraceEvent::ToolResult);
    }

    // ── Prose buffering ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn chunks_buffer_until_threshold() {
        let sink = Arc::new(MemoryTraceSink::new());
        let r = recorder(sink.clone());
        let sid = Uuid::new_v4();

        let chunk = |t: &str| {
            CanonicalUpdate::new(sid, "claude", UpdatePayload::AgentMessage(MessagePayload::chunk(t)))
        };
        r.record(&chunk("short"), None).await;
        assert!(sink.records().is_empty());

        r.record(&chunk(&"x".repeat(120)), None).await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, TraceEvent::AgentMessage);
        assert!(records[0].conversation.as_ref().unwrap().text.starts_with("short"));
    }

    #[tokio::test]
    async fn turn_complete_flushes_buffers() {
        let sink = Arc::new(MemoryTraceSink::new());
        let r = recorder(sink.clone());
        let sid = Uuid::new_v4();

        r.record(
            &CanonicalUpdate::new(sid, "claude", UpdatePayload::AgentMessage(MessagePayload::chunk("tail"))),
            None,
        )
        .await;
        r.record(
            &CanonicalUpdate::new(
                sid,
                "claude",
                UpdatePayload::TurnComplete(maestro_types::TurnCompletePayload {
                    stop_reason: maestro_types::StopReason::EndTurn,
                    usage: None,
                }),
            ),
            None,
        )
        .await;

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].conversation.as_ref().unwrap().text, "tail");
    }

    #[tokio::test]
    async fn user_message_is_recorded_immediately() {
        let sink = Arc::new(MemoryTraceSink::new());
        let r = recorder(sink.clone());
        let sid = Uuid::new_v4();

        r.record(
            &CanonicalUpdate::new(sid, "claude", UpdatePayload::UserMessage(MessagePayload::whole("hi"))),
            None,
        )
        .await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, TraceEvent::UserMessage);
    }

    // ── Cleanup ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn remove_session_discards_pending_silently() {
        let sink = Arc::new(MemoryTraceSink::new());
        let r = recorder(sink.clone());
        let sid = Uuid::new_v4();

        r.record(&tool_call(sid, "codex", "c1", json!({}), false), None).await;
        assert_eq!(r.pending_sessions(), 1);
        r.remove_session(sid);
        assert_eq!(r.pending_sessions(), 0);
        assert!(sink.records().is_empty());
    }
}
