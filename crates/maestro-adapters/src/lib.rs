// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Provider adapter layer — hides provider-specific wire dialects behind the
//! canonical session update.
//!
//! Every upstream speaks a slightly different JSON-RPC dialect over standard
//! I/O. An adapter is a total function from one raw notification to zero or
//! more [`maestro_types::CanonicalUpdate`]s; malformed input maps to "drop",
//! never to a panic or an error.
//!
//! The one behavioural split that matters downstream is *when tool-call
//! arguments arrive*: immediate-input providers send them with the
//! announcement, deferred-input providers send an empty announcement and the
//! arguments in a later `tool_call_update`. The [`AdapterBehavior`]
//! descriptor and the `input_finalized` flag on the canonical payload encode
//! this for the trace recorder.

mod adapter;
mod claude;
mod codex;
mod generic;
mod registry;
mod wire;

pub use adapter::{AdapterBehavior, ProviderAdapter};
pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use generic::GenericAdapter;
pub use registry::{adapter_for, canonical_provider_id};
