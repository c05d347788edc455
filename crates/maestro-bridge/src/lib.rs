// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Agent event bridge — converts the canonical update stream into semantic
//! block events ("the agent is reading these files", "the agent ran this
//! command"), carrying per-tool-call state across updates so later status
//! changes re-emit the same block shape.

mod bridge;
mod classify;

pub use bridge::EventBridge;
pub use classify::{classify_tool_kind, ToolKind};
