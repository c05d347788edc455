// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use maestro_types::CanonicalUpdate;
use serde_json::Value;
use uuid::Uuid;

use crate::adapter::{AdapterBehavior, ProviderAdapter};
use crate::wire::normalize_acp;

/// Claude-family upstream: streaming wire with immediate tool-call input.
///
/// Tool-call announcements carry the full argument object, so every
/// canonical `tool_call` leaves here with `input_finalized = true` and the
/// trace recorder never needs a pending entry for this provider.
pub struct ClaudeAdapter;

impl ProviderAdapter for ClaudeAdapter {
    fn id(&self) -> &'static str {
        "claude"
    }

    fn behavior(&self) -> AdapterBehavior {
        AdapterBehavior { immediate_input: true, streaming: true }
    }

    fn normalize(&self, session_id: Uuid, raw: &Value) -> Vec<CanonicalUpdate> {
        normalize_acp(session_id, self.id(), raw, |_| true)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::UpdatePayload;
    use serde_json::json;

    fn envelope(update: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "session/update",
            "params": {"sessionId": "s1", "update": update}
        })
    }

    #[test]
    fn tool_call_is_finalized_immediately() {
        let out = ClaudeAdapter.normalize(
            Uuid::new_v4(),
            &envelope(json!({
                "sessionUpdate": "tool_call",
                "toolCallId": "c2",
                "title": "bash",
                "rawInput": {"command": "npm test"}
            })),
        );
        assert_eq!(out.len(), 1);
        match &out[0].payload {
            UpdatePayload::ToolCall(tc) => {
                assert!(tc.input_finalized);
                assert_eq!(tc.raw_input["command"], "npm test");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn tool_call_without_arguments_is_still_finalized() {
        // Immediate-input contract: an empty rawInput means the tool truly
        // takes no arguments, not that they arrive later.
        let out = ClaudeAdapter.normalize(
            Uuid::new_v4(),
            &envelope(json!({
                "sessionUpdate": "tool_call",
                "toolCallId": "c3",
                "title": "list"
            })),
        );
        match &out[0].payload {
            UpdatePayload::ToolCall(tc) => assert!(tc.input_finalized),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn message_with_block_array_fans_out() {
        let out = ClaudeAdapter.normalize(
            Uuid::new_v4(),
            &envelope(json!({
                "sessionUpdate": "agent_message_chunk",
                "content": [
                    {"type": "text", "text": "first"},
                    {"type": "text", "text": "second"}
                ]
            })),
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn malformed_input_is_dropped() {
        assert!(ClaudeAdapter.normalize(Uuid::new_v4(), &json!("junk")).is_empty());
        assert!(ClaudeAdapter.normalize(Uuid::new_v4(), &json!({})).is_empty());
        // Tool call without an id.
        assert!(ClaudeAdapter
            .normalize(
                Uuid::new_v4(),
                &envelope(json!({"sessionUpdate": "tool_call", "title": "read"}))
            )
            .is_empty());
    }
}
