// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Background task queue and worker — deferred user requests held durably
//! and dispatched without blocking the request that enqueued them.
//!
//! A single polling worker claims PENDING tasks with an optimistic status
//! flip (losing the race means another worker took it), creates a session,
//! sends the prompt, and later marks the task COMPLETED once its session
//! has been reaped from the store.

mod queue;
mod worker;

pub use queue::TaskQueue;
pub use worker::TaskWorker;
