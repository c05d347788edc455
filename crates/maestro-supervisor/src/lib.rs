// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Provider process supervisor — keeps exactly one upstream specialist
//! subprocess per active session, ships prompts to its stdin, parses its
//! stdout into raw notifications, and surfaces exit and stderr.
//!
//! The wire is line-delimited JSON both ways. A dedicated reader task
//! decodes stdout; malformed lines are logged and discarded without killing
//! the process. When the child dies unexpectedly the supervisor delivers a
//! terminal [`ChildMessage::Exited`] so the owner can emit the synthetic
//! canonical error and fail the in-flight prompt.

mod child;
mod supervisor;

pub use child::{ChildMessage, SpawnedChild};
pub use supervisor::{ProcessSupervisor, SupervisorError};
