// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Shared plumbing for ACP-style wire messages.
//!
//! The envelope is `{"jsonrpc":"2.0","method":"session/update","params":
//! {"sessionId":…,"update":{"sessionUpdate":<kind>,…}}}`; adapters accept the
//! full envelope, a bare `params` object, or a bare `update` object, because
//! real upstreams disagree on how much wrapping they emit.

use maestro_types::{
    CanonicalUpdate, ErrorKind, ErrorPayload, MessagePayload, RawPlanItem, StopReason,
    ToolCallPayload, ToolCallStatus, TurnCompletePayload, UpdatePayload, UsageStats,
};
use serde_json::Value;
use uuid::Uuid;

/// Peel the JSON-RPC envelope down to the `update` object.
pub fn peel_update(raw: &Value) -> Option<&Value> {
    let obj = raw.as_object()?;
    if obj.contains_key("sessionUpdate") {
        return Some(raw);
    }
    if let Some(params) = obj.get("params") {
        return peel_update(params);
    }
    if let Some(update) = obj.get("update") {
        if update.as_object().is_some_and(|u| u.contains_key("sessionUpdate")) {
            return Some(update);
        }
    }
    None
}

/// First matching string field.
pub fn str_field<'a>(update: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| update.get(*k).and_then(Value::as_str))
}

/// Extract message text fragments from an update's `content`.
///
/// Content may be a plain string, one `{type:"text",text}` block, or an
/// array of blocks — the array case is where one notification fans out into
/// several canonical updates.
pub fn content_texts(update: &Value) -> Vec<String> {
    let Some(content) = update.get("content").or_else(|| update.get("text")) else {
        return Vec::new();
    };
    match content {
        Value::String(s) => vec![s.clone()],
        Value::Object(_) => block_text(content).into_iter().collect(),
        Value::Array(items) => items.iter().filter_map(block_text).collect(),
        _ => Vec::new(),
    }
}

fn block_text(block: &Value) -> Option<String> {
    if let Some(s) = block.as_str() {
        return Some(s.to_string());
    }
    block.get("text").and_then(Value::as_str).map(str::to_string)
}

/// Parse a tool-call payload out of an update object.
///
/// Returns `None` when the tool-call identifier is missing — the message is
/// then dropped per the adapter failure contract.
pub fn tool_call_payload(update: &Value, input_finalized: bool) -> Option<ToolCallPayload> {
    let id = str_field(update, &["toolCallId", "tool_call_id", "id"])?;
    let name = str_field(update, &["title", "name", "toolName", "tool_name"]).unwrap_or("tool");
    let raw_input = update
        .get("rawInput")
        .or_else(|| update.get("input"))
        .cloned()
        .unwrap_or(Value::Null);
    let raw_output = update
        .get("rawOutput")
        .or_else(|| update.get("output"))
        .filter(|v| !v.is_null())
        .cloned();
    let status = ToolCallStatus::coerce(str_field(update, &["status"]), raw_output.is_some());
    Some(ToolCallPayload {
        id: id.to_string(),
        name: name.to_string(),
        status,
        raw_input,
        raw_output,
        input_finalized,
    })
}

pub fn plan_items(update: &Value) -> Vec<RawPlanItem> {
    let items = update
        .get("entries")
        .or_else(|| update.get("items"))
        .and_then(Value::as_array);
    let Some(items) = items else { return Vec::new() };
    items
        .iter()
        .filter_map(|item| {
            let title = str_field(item, &["content", "title", "text"])?;
            let status = str_field(item, &["status"]).unwrap_or("pending");
            Some(RawPlanItem { title: title.to_string(), status: status.to_string() })
        })
        .collect()
}

pub fn turn_complete_payload(update: &Value) -> TurnCompletePayload {
    let stop_reason = match str_field(update, &["stopReason", "stop_reason"]) {
        Some("cancelled") | Some("canceled") => StopReason::Cancelled,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("error") => StopReason::Error,
        _ => StopReason::EndTurn,
    };
    let usage = update.get("usage").map(|u| UsageStats {
        input_tokens: u64_field(u, &["inputTokens", "input_tokens"]),
        output_tokens: u64_field(u, &["outputTokens", "output_tokens"]),
    });
    TurnCompletePayload { stop_reason, usage }
}

fn u64_field(v: &Value, keys: &[&str]) -> u64 {
    keys.iter()
        .find_map(|k| v.get(*k).and_then(Value::as_u64))
        .unwrap_or(0)
}

pub fn error_payload(update: &Value) -> ErrorPayload {
    let kind = match str_field(update, &["errorKind", "kind"]) {
        Some("cancelled") | Some("canceled") => ErrorKind::Cancelled,
        Some("timeout") => ErrorKind::Timeout,
        Some("upstream_unavailable") => ErrorKind::UpstreamUnavailable,
        _ => ErrorKind::UpstreamExited,
    };
    let message = str_field(update, &["message", "error"]).unwrap_or("upstream error");
    ErrorPayload { kind, message: message.to_string() }
}

/// The common ACP normalisation shared by all adapters.
///
/// `finalize_tool_input` decides whether a `tool_call` announcement counts as
/// carrying its arguments (immediate-input providers) or not (deferred).
pub fn normalize_acp(
    session_id: Uuid,
    provider: &str,
    raw: &Value,
    finalize_tool_input: impl Fn(&ToolCallPayload) -> bool,
) -> Vec<CanonicalUpdate> {
    let Some(update) = peel_update(raw) else {
        return Vec::new();
    };
    let Some(kind) = str_field(update, &["sessionUpdate"]) else {
        return Vec::new();
    };

    let mk = |payload| CanonicalUpdate::new(session_id, provider, payload);

    match kind {
        "agent_message_chunk" => content_texts(update)
            .into_iter()
            .map(|t| mk(UpdatePayload::AgentMessage(MessagePayload::chunk(t))))
            .collect(),
        "agent_thought_chunk" => content_texts(update)
            .into_iter()
            .map(|t| mk(UpdatePayload::AgentThought(MessagePayload::chunk(t))))
            .collect(),
        "user_message" => content_texts(update)
            .into_iter()
            .map(|t| mk(UpdatePayload::UserMessage(MessagePayload::whole(t))))
            .collect(),
        "tool_call" => match tool_call_payload(update, false) {
            Some(mut tc) => {
                tc.input_finalized = finalize_tool_input(&tc);
                vec![mk(UpdatePayload::ToolCall(tc))]
            }
            None => Vec::new(),
        },
        "tool_call_update" => match tool_call_payload(update, false) {
            Some(mut tc) => {
                // An update finalises input once it carries arguments or a
                // terminal status.
                tc.input_finalized = tc.has_input() || tc.is_terminal();
                vec![mk(UpdatePayload::ToolCallUpdate(tc))]
            }
            None => Vec::new(),
        },
        "plan" | "plan_update" => {
            vec![mk(UpdatePayload::PlanUpdate { items: plan_items(update) })]
        }
        "turn_complete" | "turn_ended" => {
            vec![mk(UpdatePayload::TurnComplete(turn_complete_payload(update)))]
        }
        "error" => vec![mk(UpdatePayload::Error(error_payload(update)))],
        _ => Vec::new(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
