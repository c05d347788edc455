// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::TraceRecord;

/// Destination of the trace journal.
///
/// Sink failures are the recorder's problem to log; they never propagate
/// into the live session pipeline.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn write(&self, record: &TraceRecord) -> anyhow::Result<()>;
}

/// In-memory sink for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryTraceSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TraceSink for MemoryTraceSink {
    async fn write(&self, record: &TraceRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record.clone());
        Ok(())
    }
}

/// Append-only JSONL journal, one record per line.
pub struct JsonlTraceSink {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlTraceSink {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self { file: tokio::sync::Mutex::new(file) })
    }
}

#[async_trait]
impl TraceSink for JsonlTraceSink {
    async fn write(&self, record: &TraceRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
