// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use maestro_store::SessionStore;
use maestro_supervisor::{ChildMessage, ProcessSupervisor, SupervisorError};
use maestro_types::{
    CanonicalUpdate, Error, ErrorKind, ErrorPayload, Result, SessionRecord, UpdatePayload,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How child specialists are brought to life.
///
/// The production implementation wraps the process supervisor; tests swap in
/// a mock that publishes canned updates into the store.
#[async_trait]
pub trait ChildLauncher: Send + Sync {
    /// Spawn the upstream process for a session and start pumping its
    /// notifications into the store.
    async fn launch(&self, record: &SessionRecord) -> Result<()>;

    /// Ship a prompt; returns once the prompt is in flight, not when the
    /// turn completes.
    async fn send_prompt(&self, session_id: Uuid, prompt: &str) -> Result<()>;

    async fn cancel(&self, session_id: Uuid) -> Result<()>;

    async fn close(&self, session_id: Uuid) -> Result<()>;
}

/// Real launcher: one subprocess per session, with a pump task that feeds
/// raw notifications into the store's publish pipeline.
pub struct ProcessLauncher {
    store: SessionStore,
    supervisor: ProcessSupervisor,
}

impl ProcessLauncher {
    pub fn new(store: SessionStore, supervisor: ProcessSupervisor) -> Self {
        Self { store, supervisor }
    }
}

#[async_trait]
impl ChildLauncher for ProcessLauncher {
    async fn launch(&self, record: &SessionRecord) -> Result<()> {
        let mut child = self
            .supervisor
            .spawn(record.id, &record.provider, &record.cwd)
            .await
            .map_err(map_supervisor_err)?;

        let store = self.store.clone();
        let session_id = record.id;
        let provider = record.provider.clone();
        tokio::spawn(async move {
            while let Some(msg) = child.recv().await {
                match msg {
                    ChildMessage::Notification(raw) => {
                        match store.push_notification(session_id, &raw).await {
                            Ok(_) => {}
                            Err(Error::SessionNotFound(_)) => break,
                            Err(e) => warn!(session = %session_id, "notification dropped: {e}"),
                        }
                    }
                    ChildMessage::Exited { code } => {
                        if code != Some(0) {
                            let update = CanonicalUpdate::new(
                                session_id,
                                provider.clone(),
                                UpdatePayload::Error(ErrorPayload {
                                    kind: ErrorKind::UpstreamExited,
                                    message: format!(
                                        "upstream exited, code {}",
                                        code.map(|c| c.to_string())
                                            .unwrap_or_else(|| "unknown".into())
                                    ),
                                }),
                            );
                            if let Err(e) = store.push_canonical(update).await {
                                debug!(session = %session_id, "exit not published: {e}");
                            }
                        }
                        store.flush_agent_buffers(session_id).await;
                        break;
                    }
                }
            }
            debug!(session = %session_id, "child pump finished");
        });

        info!(session = %record.id, provider = %record.provider, "child launched");
        Ok(())
    }

    async fn send_prompt(&self, session_id: Uuid, prompt: &str) -> Result<()> {
        self.supervisor
            .send_prompt(session_id, prompt)
            .await
            .map_err(map_supervisor_err)
    }

    async fn cancel(&self, session_id: Uuid) -> Result<()> {
        self.supervisor
            .cancel(session_id)
            .await
            .map_err(map_supervisor_err)?;
        // Surface the cancellation on the canonical stream.
        let record = self.store.get_session(session_id).await?;
        let update = CanonicalUpdate::new(
            session_id,
            record.provider,
            UpdatePayload::Error(ErrorPayload {
                kind: ErrorKind::Cancelled,
                message: "prompt cancelled by user".into(),
            }),
        );
        self.store.push_canonical(update).await
    }

    async fn close(&self, session_id: Uuid) -> Result<()> {
        self.store.flush_agent_buffers(session_id).await;
        self.supervisor.close(session_id).await.map_err(map_supervisor_err)
    }
}

fn map_supervisor_err(err: SupervisorError) -> Error {
    match err {
        SupervisorError::UnknownProvider(p) => {
            Error::UpstreamUnavailable(format!("provider '{p}' is not configured"))
        }
        SupervisorError::Spawn { command, source } => {
            Error::UpstreamUnavailable(format!("could not spawn '{command}': {source}"))
        }
        SupervisorError::SpawnTimeout(command) => Error::timeout(format!("spawn of '{command}'")),
        SupervisorError::NotRunning(_) | SupervisorError::Exited(_) => {
            Error::UpstreamExited { code: None }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
