// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Trace recorder — turns the canonical update stream of a session into a
//! permanent journal of `(tool_call, tool_result)` pairs and message traces.
//!
//! The hard case is deferred tool-call input: some providers announce a call
//! before its arguments exist. The recorder parks those announcements in a
//! per-session pending map and emits the `tool_call` trace only once a later
//! update finalises the input, deduplicating by call id throughout.

mod record;
mod recorder;
mod sink;
mod vcs;

pub use record::{ConversationSection, ToolSection, TraceEvent, TraceRecord};
pub use recorder::TraceRecorder;
pub use sink::{JsonlTraceSink, MemoryTraceSink, TraceSink};
pub use vcs::{file_paths_from_input, vcs_snapshot, VcsContext};
