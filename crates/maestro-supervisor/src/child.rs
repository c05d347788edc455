// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

/// One message from a child's I/O plumbing to its owner.
#[derive(Debug)]
pub enum ChildMessage {
    /// One parsed line-delimited JSON notification from stdout.
    Notification(Value),
    /// The process is gone; terminal message on the channel.
    Exited { code: Option<i32> },
}

/// Receiving half of a spawned child, handed to the session pump.
#[derive(Debug)]
pub struct SpawnedChild {
    pub session_id: Uuid,
    pub provider: String,
    events: mpsc::Receiver<ChildMessage>,
}

impl SpawnedChild {
    pub async fn recv(&mut self) -> Option<ChildMessage> {
        self.events.recv().await
    }
}

/// Control half kept in the supervisor's registry.
pub(crate) struct ChildControl {
    pub stdin_tx: mpsc::Sender<String>,
    pub alive: Arc<AtomicBool>,
    pub exited: Arc<Notify>,
    pub kill: Arc<Notify>,
}

/// Wire up the I/O tasks around a freshly spawned process.
///
/// Returns the owner-facing receiver plus the control half. `on_exit` runs
/// once, after the process is reaped.
pub(crate) fn pump_child(
    session_id: Uuid,
    provider: String,
    mut child: Child,
    on_exit: impl FnOnce() + Send + 'static,
) -> (SpawnedChild, ChildControl) {
    let (events_tx, events_rx) = mpsc::channel::<ChildMessage>(256);
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(64);
    let alive = Arc::new(AtomicBool::new(true));
    let exited = Arc::new(Notify::new());
    let kill = Arc::new(Notify::new());

    // ── Writer: prompt lines → child stdin ───────────────────────────────────
    let mut stdin = child.stdin.take();
    tokio::spawn(async move {
        while let Some(line) = stdin_rx.recv().await {
            let Some(out) = stdin.as_mut() else { break };
            if out.write_all(line.as_bytes()).await.is_err()
                || out.write_all(b"\n").await.is_err()
                || out.flush().await.is_err()
            {
                debug!(session = %session_id, "child stdin closed");
                break;
            }
        }
        // Dropping stdin signals EOF — the polite shutdown path.
        drop(stdin);
    });

    // ── Stderr: log lines, never forward ─────────────────────────────────────
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(session = %session_id, "child stderr: {line}");
            }
        });
    }

    // ── Reader + reaper ──────────────────────────────────────────────────────
    let stdout = child.stdout.take();
    let alive2 = alive.clone();
    let exited2 = exited.clone();
    let kill2 = kill.clone();
    let events_tx2 = events_tx.clone();
    tokio::spawn(async move {
        let read_loop = async {
            let Some(stdout) = stdout else { return };
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(trimmed) {
                            Ok(value) => {
                                if events_tx2.send(ChildMessage::Notification(value)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                // Parse errors never kill the process.
                                warn!(session = %session_id, "discarding malformed stdout line: {e}");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(session = %session_id, "child stdout read error: {e}");
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = read_loop => {}
            _ = kill2.notified() => {
                debug!(session = %session_id, "hard-killing child");
                let _ = child.start_kill();
            }
        }

        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(session = %session_id, "child reap failed: {e}");
                None
            }
        };
        alive2.store(false, Ordering::SeqCst);
        exited2.notify_waiters();
        on_exit();
        let _ = events_tx.send(ChildMessage::Exited { code }).await;
        debug!(session = %session_id, ?code, "child exited");
    });

    (
        SpawnedChild { session_id, provider, events: events_rx },
        ChildControl { stdin_tx, alive, exited, kill },
    )
}
