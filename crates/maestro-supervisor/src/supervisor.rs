// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use maestro_config::{Config, ProviderSpec};
use maestro_types::Tunables;
use serde_json::json;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::child::{pump_child, ChildControl, SpawnedChild};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("provider '{0}' is not configured")]
    UnknownProvider(String),

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("spawn of '{0}' timed out")]
    SpawnTimeout(String),

    #[error("no live child for session {0}")]
    NotRunning(Uuid),

    #[error("child for session {0} has exited")]
    Exited(Uuid),
}

struct Inner {
    children: Mutex<HashMap<Uuid, ChildControl>>,
    request_ids: AtomicU64,
    tunables: Tunables,
}

/// Spawns and tracks one upstream specialist subprocess per session.
#[derive(Clone)]
pub struct ProcessSupervisor {
    config: Arc<Config>,
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(config: Arc<Config>) -> Self {
        let tunables = config.tunables.clone();
        Self {
            config,
            inner: Arc::new(Inner {
                children: Mutex::new(HashMap::new()),
                request_ids: AtomicU64::new(1),
                tunables,
            }),
        }
    }

    /// Resolve the provider binary and launch it with `cwd` as working
    /// directory. The returned [`SpawnedChild`] must be pumped by the owner;
    /// control stays with the supervisor.
    pub async fn spawn(
        &self,
        session_id: Uuid,
        provider: &str,
        cwd: &Path,
    ) -> Result<SpawnedChild, SupervisorError> {
        let spec = self
            .resolve(provider)
            .ok_or_else(|| SupervisorError::UnknownProvider(provider.to_string()))?;

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        // Credential pass-through: read at spawn time, never stored.
        if let Some(var) = &spec.auth_token_env {
            if let Ok(token) = std::env::var(var) {
                cmd.env(var, token);
            }
        }

        let spawn = async { cmd.spawn() };
        let child = tokio::time::timeout(self.inner.tunables.spawn_timeout(), spawn)
            .await
            .map_err(|_| SupervisorError::SpawnTimeout(spec.command.clone()))?
            .map_err(|source| SupervisorError::Spawn { command: spec.command.clone(), source })?;

        info!(session = %session_id, provider, command = %spec.command, "child spawned");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let (spawned, control) = pump_child(session_id, provider.to_string(), child, move || {
            if let Some(inner) = weak.upgrade() {
                inner.children.lock().unwrap_or_else(|e| e.into_inner()).remove(&session_id);
            }
        });
        self.lock_children().insert(session_id, control);
        Ok(spawned)
    }

    /// Write a `session/prompt` request on the child's stdin.
    pub async fn send_prompt(&self, session_id: Uuid, prompt: &str) -> Result<(), SupervisorError> {
        let request_id = self.inner.request_ids.fetch_add(1, Ordering::Relaxed);
        let line = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "session/prompt",
            "params": {
                "sessionId": session_id,
                "prompt": [{"type": "text", "text": prompt}],
            }
        })
        .to_string();
        self.write_line(session_id, line).await
    }

    /// Request a graceful stop of the in-flight prompt. The upstream is
    /// expected to stop after flushing any in-flight message.
    pub async fn cancel(&self, session_id: Uuid) -> Result<(), SupervisorError> {
        let line = json!({
            "jsonrpc": "2.0",
            "method": "session/cancel",
            "params": {"sessionId": session_id}
        })
        .to_string();
        self.write_line(session_id, line).await
    }

    /// Close stdin, wait a bounded grace interval, then hard-kill.
    pub async fn close(&self, session_id: Uuid) -> Result<(), SupervisorError> {
        let control = self
            .lock_children()
            .remove(&session_id)
            .ok_or(SupervisorError::NotRunning(session_id))?;

        // Dropping the last sender closes the writer task, which closes the
        // child's stdin.
        let exited = control.exited.clone();
        let kill = control.kill.clone();
        let alive = control.alive.clone();
        drop(control);

        let grace = self.inner.tunables.close_grace();
        if alive.load(Ordering::SeqCst) {
            let waited = tokio::time::timeout(grace, exited.notified()).await;
            if waited.is_err() && alive.load(Ordering::SeqCst) {
                warn!(session = %session_id, "grace expired; killing child");
                kill.notify_waiters();
                let _ = tokio::time::timeout(grace, exited.notified()).await;
            }
        }
        debug!(session = %session_id, "child closed");
        Ok(())
    }

    pub fn is_alive(&self, session_id: Uuid) -> bool {
        self.lock_children()
            .get(&session_id)
            .map(|c| c.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn write_line(&self, session_id: Uuid, line: String) -> Result<(), SupervisorError> {
        let (tx, alive) = {
            let children = self.lock_children();
            let control = children
                .get(&session_id)
                .ok_or(SupervisorError::NotRunning(session_id))?;
            (control.stdin_tx.clone(), control.alive.load(Ordering::SeqCst))
        };
        if !alive {
            return Err(SupervisorError::Exited(session_id));
        }
        tx.send(line)
            .await
            .map_err(|_| SupervisorError::Exited(session_id))
    }

    fn resolve(&self, provider: &str) -> Option<ProviderSpec> {
        // Exact id first, then the canonical (synonym-collapsed) id.
        self.config
            .providers
            .get(provider)
            .or_else(|| {
                self.config
                    .providers
                    .get(maestro_adapters::canonical_provider_id(provider))
            })
            .cloned()
    }

    fn lock_children(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ChildControl>> {
        self.inner.children.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::child::ChildMessage;
    use std::collections::HashMap as Map;

    fn config_with(provider: &str, command: &str, args: &[&str]) -> Arc<Config> {
        let mut config = Config::default();
        config.tunables.close_grace_secs = 1;
        config.providers.insert(
            provider.to_string(),
            ProviderSpec {
                command: command.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                env: Map::new(),
                auth_token_env: None,
            },
        );
        Arc::new(config)
    }

    #[tokio::test]
    async fn unknown_provider_fails_to_spawn() {
        let sup = ProcessSupervisor::new(Arc::new(Config::default()));
        let err = sup
            .spawn(Uuid::new_v4(), "nope", Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownProvider(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn provider_synonyms_resolve_to_the_configured_binary() {
        // Configured under the canonical id, spawned via a synonym.
        let sup = ProcessSupervisor::new(config_with("claude", "true", &[]));
        let sid = Uuid::new_v4();
        assert!(sup.spawn(sid, "claude-code", Path::new("/tmp")).await.is_ok());
    }

    #[tokio::test]
    async fn missing_binary_is_an_unavailable_error() {
        let sup = ProcessSupervisor::new(config_with("x", "/no/such/binary", &[]));
        let err = sup
            .spawn(Uuid::new_v4(), "x", Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reader_parses_json_and_skips_junk() {
        let sup = ProcessSupervisor::new(config_with(
            "echoer",
            "sh",
            &["-c", "echo '{\"sessionUpdate\":\"turn_complete\"}'; echo 'not json'; echo '{\"n\":2}'"],
        ));
        let sid = Uuid::new_v4();
        let mut child = sup.spawn(sid, "echoer", Path::new("/tmp")).await.unwrap();

        let first = child.recv().await.unwrap();
        match first {
            ChildMessage::Notification(v) => assert_eq!(v["sessionUpdate"], "turn_complete"),
            other => panic!("expected notification, got {other:?}"),
        }
        // The junk line is skipped; next is the second JSON object.
        let second = child.recv().await.unwrap();
        match second {
            ChildMessage::Notification(v) => assert_eq!(v["n"], 2),
            other => panic!("expected notification, got {other:?}"),
        }
        // Terminal message after EOF.
        let last = child.recv().await.unwrap();
        assert!(matches!(last, ChildMessage::Exited { code: Some(0) }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn send_after_exit_fails_with_clear_kind() {
        let sup = ProcessSupervisor::new(config_with("true", "true", &[]));
        let sid = Uuid::new_v4();
        let mut child = sup.spawn(sid, "true", Path::new("/tmp")).await.unwrap();

        // Drain to the exit message so the registry entry is gone.
        loop {
            match child.recv().await {
                Some(ChildMessage::Exited { .. }) | None => break,
                Some(_) => {}
            }
        }
        let err = sup.send_prompt(sid, "hello").await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::NotRunning(_) | SupervisorError::Exited(_)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prompt_reaches_child_stdin() {
        // `cat` echoes the JSON-RPC request line straight back.
        let sup = ProcessSupervisor::new(config_with("cat", "cat", &[]));
        let sid = Uuid::new_v4();
        let mut child = sup.spawn(sid, "cat", Path::new("/tmp")).await.unwrap();

        sup.send_prompt(sid, "run the tests").await.unwrap();
        let echoed = child.recv().await.unwrap();
        match echoed {
            ChildMessage::Notification(v) => {
                assert_eq!(v["method"], "session/prompt");
                assert_eq!(v["params"]["prompt"][0]["text"], "run the tests");
            }
            other => panic!("expected echoed request, got {other:?}"),
        }
        sup.close(sid).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn close_kills_a_stubborn_child() {
        let sup = ProcessSupervisor::new(config_with("sleeper", "sleep", &["60"]));
        let sid = Uuid::new_v4();
        let _child = sup.spawn(sid, "sleeper", Path::new("/tmp")).await.unwrap();
        // sleep ignores stdin EOF; close must fall through to the kill path.
        sup.close(sid).await.unwrap();
        assert!(!sup.is_alive(sid));
    }
}
