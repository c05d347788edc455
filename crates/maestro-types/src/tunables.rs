// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime thresholds and cadences, hoisted into one struct so they can be
/// overridden from config (and shrunk in tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Character count at which buffered agent prose is flushed as one
    /// message trace.
    pub message_flush_chars: usize,
    /// Soft cap on per-session history entries; oldest are trimmed.
    pub history_cap: usize,
    /// Cap on per-session buffered (pre-attach) SSE updates.
    pub pending_cap: usize,
    /// How often the idle sweeper runs.
    pub sweep_interval_secs: u64,
    /// Idle age after which an unattached session is evicted.
    pub idle_timeout_secs: u64,
    /// Worker: pending-task dispatch cadence.
    pub dispatch_interval_secs: u64,
    /// Worker: completion-scan cadence.
    pub completion_scan_interval_secs: u64,
    /// Budget for spawning an upstream process.
    pub spawn_timeout_secs: u64,
    /// Grace period between closing stdin and hard-killing a child.
    pub close_grace_secs: u64,
    /// Budget for one best-effort git invocation.
    pub git_timeout_secs: u64,
    /// Maximum concurrent delegations (1 serialises them).
    pub delegation_concurrency: usize,
    /// Budget for one delegated child turn before the permit is reclaimed.
    pub delegation_turn_timeout_secs: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            message_flush_chars: 100,
            history_cap: 500,
            pending_cap: 100,
            sweep_interval_secs: 300,
            idle_timeout_secs: 3600,
            dispatch_interval_secs: 5,
            completion_scan_interval_secs: 15,
            spawn_timeout_secs: 120,
            close_grace_secs: 3,
            git_timeout_secs: 5,
            delegation_concurrency: 1,
            delegation_turn_timeout_secs: 900,
        }
    }
}

impl Tunables {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_secs)
    }

    pub fn completion_scan_interval(&self) -> Duration {
        Duration::from_secs(self.completion_scan_interval_secs)
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_secs(self.spawn_timeout_secs)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_secs(self.close_grace_secs)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn delegation_turn_timeout(&self) -> Duration {
        Duration::from_secs(self.delegation_turn_timeout_secs)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
