// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use maestro_types::{CanonicalUpdate, ToolCallPayload};
use serde_json::Value;
use uuid::Uuid;

use crate::adapter::{AdapterBehavior, ProviderAdapter};
use crate::wire::normalize_acp;

/// Codex-family upstream: announces tool calls before their arguments.
///
/// The first `tool_call` for an id typically carries an empty `rawInput`;
/// the arguments show up in a later `tool_call_update`. A canonical
/// `tool_call` from this adapter is only `input_finalized` when the
/// announcement itself happened to carry arguments.
pub struct CodexAdapter;

impl ProviderAdapter for CodexAdapter {
    fn id(&self) -> &'static str {
        "codex"
    }

    fn behavior(&self) -> AdapterBehavior {
        AdapterBehavior { immediate_input: false, streaming: true }
    }

    fn normalize(&self, session_id: Uuid, raw: &Value) -> Vec<CanonicalUpdate> {
        normalize_acp(session_id, self.id(), raw, ToolCallPayload::has_input)
    }

    fn resolve_deferred_input(&self, update: &ToolCallPayload) -> Option<Value> {
        // Codex repeats the full argument object once it is known; partial
        // argument streaming never crosses the wire.
        if update.has_input() {
            Some(update.raw_input.clone())
        } else {
            None
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
