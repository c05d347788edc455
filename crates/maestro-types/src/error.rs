// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;
use uuid::Uuid;

use crate::ErrorKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced across subsystem boundaries.
///
/// Anything inside the stream pipeline (parse, subscriber, persistence) is
/// recovered locally and logged; these variants exist for the cases that
/// must reach a caller — a failed prompt, a missing session, a dead child.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not initialized")]
    NotInitialized,

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream exited with code {}", .code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into()))]
    UpstreamExited { code: Option<i32> },

    #[error("cancelled")]
    Cancelled,

    #[error("{operation} timed out")]
    Timeout { operation: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl Error {
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout { operation: operation.into() }
    }

    /// Wire-visible kind for the canonical error payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::NotInitialized => ErrorKind::NotInitialized,
            Error::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Error::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Error::UpstreamExited { .. } => ErrorKind::UpstreamExited,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Parse(_) => ErrorKind::ParseError,
            Error::Persistence(_) => ErrorKind::PersistenceError,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
