// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use maestro_types::{CanonicalUpdate, ToolCallPayload};
use serde_json::Value;
use uuid::Uuid;

/// How a provider's wire behaves; consulted by the trace recorder and the
/// session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterBehavior {
    /// True when tool-call announcements carry the full arguments.
    pub immediate_input: bool,
    /// True when the wire streams message chunks (as opposed to whole
    /// messages per notification).
    pub streaming: bool,
}

/// One provider dialect.
///
/// Implementations must be total: any malformed or unknown notification
/// normalises to an empty vec (drop), never an error.
pub trait ProviderAdapter: Send + Sync {
    /// Canonical provider id (post synonym collapse).
    fn id(&self) -> &'static str;

    fn behavior(&self) -> AdapterBehavior;

    /// Map one raw wire notification to canonical updates.
    ///
    /// A single notification may fan out (e.g. a message with several
    /// content blocks); an irrelevant or malformed one maps to `vec![]`.
    fn normalize(&self, session_id: Uuid, raw: &Value) -> Vec<CanonicalUpdate>;

    /// Resolve the finalised input for a pending (deferred-input) tool call
    /// from a later update. Returns `None` when the update still carries no
    /// usable arguments. The default covers providers whose updates simply
    /// repeat the full argument object.
    fn resolve_deferred_input(&self, update: &ToolCallPayload) -> Option<Value> {
        if update.has_input() {
            Some(update.raw_input.clone())
        } else {
            None
        }
    }
}
