// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Shared data model for the maestro orchestration runtime.
//!
//! Everything that crosses a subsystem boundary lives here: the canonical
//! session update (the only thing adapters, recorder, bridge and store
//! exchange), the semantic block events produced by the bridge, session and
//! background-task records, and the runtime tunables.

mod error;
mod event;
mod session;
mod task;
mod tunables;
mod update;

pub use error::{Error, Result};
pub use event::{Block, BlockStatus, ChangeType, FileChange, PlanItem, PlanItemStatus, SemanticEvent};
pub use session::{SessionRecord, SessionRole, Workspace, WorkspaceStatus};
pub use task::{BackgroundTask, ParsedTask, TaskProgress, TaskSections, TaskStatus};
pub use tunables::Tunables;
pub use update::{
    consolidate_history, CanonicalUpdate, ErrorKind, ErrorPayload, MessagePayload, RawPlanItem,
    StopReason, ToolCallPayload, ToolCallStatus, TurnCompletePayload, UpdatePayload, UsageStats,
};
