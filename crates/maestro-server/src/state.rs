// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use maestro_config::Config;
use maestro_orch::{ChildLauncher, Orchestrator, ProcessLauncher};
use maestro_store::{MemoryPersistence, Persistence, SessionStore};
use maestro_supervisor::ProcessSupervisor;
use maestro_trace::{MemoryTraceSink, TraceRecorder, TraceSink};
use maestro_worker::{TaskQueue, TaskWorker};

/// Everything the request handlers need, assembled once at server start.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: SessionStore,
    pub launcher: Arc<dyn ChildLauncher>,
    pub orchestrator: Orchestrator,
    pub queue: TaskQueue,
    pub worker: Arc<TaskWorker>,
    /// JSON-RPC handshake flag; method calls before `initialize` are
    /// rejected with -32000.
    pub initialized: AtomicBool,
}

impl AppState {
    /// Production wiring: in-memory persistence and trace sink, real
    /// process launcher.
    pub fn build(config: Arc<Config>) -> Arc<Self> {
        Self::build_with(
            config,
            Arc::new(MemoryPersistence::new()),
            Arc::new(MemoryTraceSink::new()),
            None,
        )
    }

    /// Wiring with explicit persistence and trace sink, and optionally a
    /// launcher override — the latter is what tests use.
    pub fn build_with(
        config: Arc<Config>,
        persistence: Arc<dyn Persistence>,
        trace_sink: Arc<dyn TraceSink>,
        launcher: Option<Arc<dyn ChildLauncher>>,
    ) -> Arc<Self> {
        let recorder = Arc::new(TraceRecorder::new(trace_sink, &config.tunables));
        let store = SessionStore::new(recorder, persistence.clone(), config.tunables.clone());
        let supervisor = ProcessSupervisor::new(config.clone());
        let launcher: Arc<dyn ChildLauncher> = launcher
            .unwrap_or_else(|| Arc::new(ProcessLauncher::new(store.clone(), supervisor.clone())));
        let orchestrator = Orchestrator::new(store.clone(), launcher.clone(), config.clone());
        let queue = TaskQueue::new(persistence);
        let worker =
            TaskWorker::new(queue.clone(), store.clone(), launcher.clone(), config.clone());

        Arc::new(Self {
            config,
            store,
            launcher,
            orchestrator,
            queue,
            worker,
            initialized: AtomicBool::new(false),
        })
    }
}
