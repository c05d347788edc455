// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use maestro_types::CanonicalUpdate;
use serde_json::Value;
use uuid::Uuid;

use crate::adapter::{AdapterBehavior, ProviderAdapter};
use crate::wire::normalize_acp;

/// Fallback adapter for providers that follow the standard wire contract.
/// Unknown provider identifiers resolve here.
pub struct GenericAdapter;

impl ProviderAdapter for GenericAdapter {
    fn id(&self) -> &'static str {
        "generic"
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

    #[test]
    fn normalizes_standard_kinds() {
        let sid = Uuid::new_v4();
        let msg = GenericAdapter.normalize(
            sid,
            &json!({"sessionUpdate": "agent_message_chunk", "content": "hi"}),
        );
        assert!(matches!(msg[0].payload, UpdatePayload::AgentMessage(_)));

        let turn = GenericAdapter.normalize(
            sid,
            &json!({"sessionUpdate": "turn_complete", "stopReason": "end_turn"}),
        );
        assert!(matches!(turn[0].payload, UpdatePayload::TurnComplete(_)));
    }

    #[test]
    fn carries_the_generic_provider_id() {
        let out = GenericAdapter.normalize(
            Uuid::new_v4(),
            &json!({"sessionUpdate": "agent_thought_chunk", "content": "hmm"}),
        );
        assert_eq!(out[0].provider, "generic");
    }
}
