// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Instant;

use maestro_bridge::EventBridge;
use maestro_trace::TraceRecorder;
use maestro_types::{
    consolidate_history, Block, CanonicalUpdate, Error, MessagePayload, Result, SemanticEvent,
    SessionRecord, Tunables, UpdatePayload,
};
use serde_json::Value;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::persistence::Persistence;

/// Mutable per-session state, guarded by the per-session lock.
struct SessionState {
    record: SessionRecord,
    history: Vec<CanonicalUpdate>,
    /// Updates buffered while no SSE listener is attached.
    pending: VecDeque<CanonicalUpdate>,
    /// The single active SSE attachment, if any.
    sse: Option<mpsc::Sender<CanonicalUpdate>>,
    /// While set, prompt-response updates are being delivered over a
    /// dedicated response stream, so SSE fan-out is suppressed.
    streaming_mode: bool,
    bridge: EventBridge,
    last_activity: Instant,
}

struct SessionSlot {
    /// Immutable after creation (spec invariant), so readable without the lock.
    provider: String,
    cwd: PathBuf,
    state: TokioMutex<SessionState>,
    events: broadcast::Sender<SemanticEvent>,
}

impl SessionSlot {
    fn new(record: SessionRecord) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            provider: record.provider.clone(),
            cwd: record.cwd.clone(),
            state: TokioMutex::new(SessionState {
                bridge: EventBridge::new(record.id),
                record,
                history: Vec::new(),
                pending: VecDeque::new(),
                sse: None,
                streaming_mode: false,
                last_activity: Instant::now(),
            }),
            events,
        })
    }
}

/// Counters returned by [`SessionStore::memory_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub sessions: usize,
    pub active_sse: usize,
    pub streaming: usize,
    pub history_entries: usize,
    pub buffered: usize,
    pub stale: usize,
}

/// Handle returned by [`SessionStore::subscribe_fn`]; dropping it
/// unsubscribes.
pub struct SubscriberHandle {
    join: Option<JoinHandle<()>>,
}

impl SubscriberHandle {
    pub fn unsubscribe(mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }

    /// Keep the subscription alive without holding the handle.
    pub fn detach(mut self) {
        self.join.take();
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

struct Inner {
    sessions: StdMutex<HashMap<Uuid, Arc<SessionSlot>>>,
    recorder: Arc<TraceRecorder>,
    persistence: Arc<dyn Persistence>,
    tunables: Tunables,
    hydrated: AtomicBool,
    /// session id → background task id, for progress reporting.
    task_bindings: StdMutex<HashMap<Uuid, Uuid>>,
}

/// Process-wide registry of live sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    pub fn new(
        recorder: Arc<TraceRecorder>,
        persistence: Arc<dyn Persistence>,
        tunables: Tunables,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: StdMutex::new(HashMap::new()),
                recorder,
                persistence,
                tunables,
                hydrated: AtomicBool::new(false),
                task_bindings: StdMutex::new(HashMap::new()),
            }),
        }
    }

    pub fn persistence(&self) -> Arc<dyn Persistence> {
        self.inner.persistence.clone()
    }

    pub fn tunables(&self) -> &Tunables {
        &self.inner.tunables
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<SessionSlot>>> {
        self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, id: Uuid) -> Result<Arc<SessionSlot>> {
        self.lock_map().get(&id).cloned().ok_or(Error::SessionNotFound(id))
    }

    // ── Session lifecycle ────────────────────────────────────────────────────

    /// Insert or update a session. On insert, the per-session event bridge is
    /// created and one `agent_started` semantic event is emitted. Returns
    /// true when the session was new.
    pub async fn upsert_session(&self, record: SessionRecord) -> bool {
        let (slot, is_new) = {
            let mut map = self.lock_map();
            match map.get(&record.id) {
                Some(slot) => (slot.clone(), false),
                None => {
                    let slot = SessionSlot::new(record.clone());
                    map.insert(record.id, slot.clone());
                    (slot, true)
                }
            }
        };

        if is_new {
            info!(session = %record.id, provider = %record.provider, role = %record.role, "session created");
            let _ = slot.events.send(SemanticEvent::new(record.id, Block::AgentStarted));
        } else {
            let mut st = slot.state.lock().await;
            st.record = record.clone();
        }

        if let Err(e) = self.inner.persistence.save_session(&record).await {
            warn!(session = %record.id, "session not persisted: {e}");
        }
        is_new
    }

    pub async fn get_session(&self, id: Uuid) -> Result<SessionRecord> {
        let slot = self.slot(id)?;
        let st = slot.state.lock().await;
        Ok(st.record.clone())
    }

    /// All live sessions, newest first.
    pub async fn list_sessions(&self) -> Vec<SessionRecord> {
        let slots: Vec<Arc<SessionSlot>> = self.lock_map().values().cloned().collect();
        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            records.push(slot.state.lock().await.record.clone());
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock_map().contains_key(&id)
    }

    /// Tear down a session: bridge state, subscribers, buffers, pending
    /// traces, and the durable record.
    pub async fn delete_session(&self, id: Uuid) -> Result<()> {
        self.teardown(id).await?;
        if let Err(e) = self.inner.persistence.delete_session(id).await {
            warn!(session = %id, "session delete not persisted: {e}");
        }
        Ok(())
    }

    /// Memory-only removal (idle sweep); the durable record survives.
    async fn evict_session(&self, id: Uuid) -> Result<()> {
        debug!(session = %id, "evicting idle session");
        self.teardown(id).await
    }

    async fn teardown(&self, id: Uuid) -> Result<()> {
        let slot = {
            let mut map = self.lock_map();
            map.remove(&id).ok_or(Error::SessionNotFound(id))?
        };
        {
            let mut st = slot.state.lock().await;
            st.bridge.cleanup();
            st.sse = None;
            st.pending.clear();
        }
        self.inner.recorder.remove_session(id);
        self.inner.task_bindings.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
        Ok(())
    }

    // ── Metadata mutators ────────────────────────────────────────────────────

    pub async fn rename_session(&self, id: Uuid, title: &str) -> Result<()> {
        self.mutate_record(id, |r| r.title = Some(title.to_string())).await
    }

    pub async fn mark_first_prompt_sent(&self, id: Uuid) -> Result<()> {
        self.mutate_record(id, |r| r.first_prompt_sent = true).await
    }

    pub async fn update_mode(&self, id: Uuid, mode: &str) -> Result<()> {
        self.mutate_record(id, |r| r.mode = Some(mode.to_string())).await
    }

    async fn mutate_record(&self, id: Uuid, f: impl FnOnce(&mut SessionRecord)) -> Result<()> {
        let slot = self.slot(id)?;
        let record = {
            let mut st = slot.state.lock().await;
            f(&mut st.record);
            st.record.clone()
        };
        if let Err(e) = self.inner.persistence.save_session(&record).await {
            warn!(session = %id, "metadata change not persisted: {e}");
        }
        Ok(())
    }

    // ── SSE attachment ───────────────────────────────────────────────────────

    /// Attach the single SSE listener for a session. Buffered updates are
    /// flushed into the returned channel first; attaching again replaces the
    /// previous attachment (whose stream then ends).
    pub async fn attach_sse(&self, id: Uuid) -> Result<mpsc::Receiver<CanonicalUpdate>> {
        let slot = self.slot(id)?;
        let mut st = slot.state.lock().await;
        let cap = (self.inner.tunables.pending_cap * 2).max(16);
        let (tx, rx) = mpsc::channel(cap);
        for update in st.pending.drain(..) {
            // Capacity covers the whole pending buffer; a failure here means
            // the new consumer vanished already.
            if tx.try_send(update).is_err() {
                break;
            }
        }
        if st.sse.replace(tx).is_some() {
            debug!(session = %id, "previous SSE attachment replaced");
        }
        st.last_activity = Instant::now();
        Ok(rx)
    }

    pub async fn detach_sse(&self, id: Uuid) -> Result<()> {
        let slot = self.slot(id)?;
        let mut st = slot.state.lock().await;
        st.sse = None;
        Ok(())
    }

    pub async fn set_streaming_mode(&self, id: Uuid, on: bool) -> Result<()> {
        let slot = self.slot(id)?;
        let mut st = slot.state.lock().await;
        st.streaming_mode = on;
        Ok(())
    }

    // ── Publish pipeline ─────────────────────────────────────────────────────

    /// Append a synthetic user message: history and trace only, no fan-out
    /// (the user already has the prompt locally).
    pub async fn push_user_message(&self, id: Uuid, text: &str) -> Result<()> {
        let slot = self.slot(id)?;
        let update = CanonicalUpdate::new(
            id,
            slot.provider.clone(),
            UpdatePayload::UserMessage(MessagePayload::whole(text)),
        );
        {
            let mut st = slot.state.lock().await;
            push_history(&mut st, update.clone(), self.inner.tunables.history_cap);
            st.last_activity = Instant::now();
        }
        self.inner.recorder.record(&update, Some(&slot.cwd)).await;
        Ok(())
    }

    /// Feed one raw provider notification: normalise, then publish each
    /// canonical form (history → trace → bridge/subscribers → SSE).
    pub async fn push_notification(&self, id: Uuid, raw: &Value) -> Result<usize> {
        let slot = self.slot(id)?;
        let adapter = maestro_adapters::adapter_for(&slot.provider);
        let updates = adapter.normalize(id, raw);
        let count = updates.len();
        for update in updates {
            self.publish(&slot, update).await;
        }
        Ok(count)
    }

    /// Publish an already-canonical update (synthetic errors, cancel).
    pub async fn push_canonical(&self, update: CanonicalUpdate) -> Result<()> {
        let slot = self.slot(update.session_id)?;
        self.publish(&slot, update).await;
        Ok(())
    }

    async fn publish(&self, slot: &Arc<SessionSlot>, update: CanonicalUpdate) {
        // Step 1 (under the session lock): history append + bridge translation.
        let events = {
            let mut st = slot.state.lock().await;
            st.last_activity = Instant::now();
            push_history(&mut st, update.clone(), self.inner.tunables.history_cap);
            st.bridge.handle(&update)
        };

        // Step 2: trace recording (may suspend; no lock held).
        self.inner.recorder.record(&update, Some(&slot.cwd)).await;

        // Step 3: semantic events to subscribers. Send errors mean "nobody
        // listening", which is fine.
        for ev in events {
            let _ = slot.events.send(ev);
        }

        // Step 4: task progress, best-effort.
        self.update_task_progress(&update).await;

        // Step 5 (last): SSE enqueue, unless the session is streaming its
        // prompt response over a dedicated channel.
        let mut st = slot.state.lock().await;
        if st.streaming_mode {
            return;
        }
        match st.sse.clone() {
            Some(tx) => {
                if tx.try_send(update.clone()).is_err() {
                    // Slow or gone consumer: treat the stream as closed and
                    // fall back to buffering.
                    warn!(session = %update.session_id, "SSE consumer stalled; detaching");
                    st.sse = None;
                    push_pending(&mut st, update, self.inner.tunables.pending_cap);
                }
            }
            None => push_pending(&mut st, update, self.inner.tunables.pending_cap),
        }
    }

    /// Drain recorder buffers for a session (end of prompt / end of session).
    pub async fn flush_agent_buffers(&self, id: Uuid) {
        self.inner.recorder.flush_session(id).await;
    }

    // ── Semantic-event plane ─────────────────────────────────────────────────

    pub fn subscribe(&self, id: Uuid) -> Result<broadcast::Receiver<SemanticEvent>> {
        Ok(self.slot(id)?.events.subscribe())
    }

    /// Closure-shaped subscription. Handler errors (and panics) are logged
    /// and never break the pipeline or other subscribers.
    pub fn subscribe_fn<F>(&self, id: Uuid, handler: F) -> Result<SubscriberHandle>
    where
        F: Fn(SemanticEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut rx = self.subscribe(id)?;
        let join = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => {
                        let outcome =
                            std::panic::catch_unwind(AssertUnwindSafe(|| handler(ev)));
                        match outcome {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!(session = %id, "subscriber error: {e}"),
                            Err(_) => warn!(session = %id, "subscriber panicked"),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(session = %id, "subscriber lagged by {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(SubscriberHandle { join: Some(join) })
    }

    // ── History ──────────────────────────────────────────────────────────────

    pub async fn get_history(&self, id: Uuid) -> Result<Vec<CanonicalUpdate>> {
        let slot = self.slot(id)?;
        let st = slot.state.lock().await;
        Ok(st.history.clone())
    }

    /// History with every maximal run of agent-message chunks merged.
    pub async fn get_consolidated_history(&self, id: Uuid) -> Result<Vec<CanonicalUpdate>> {
        let history = self.get_history(id).await?;
        Ok(consolidate_history(&history))
    }

    // ── Memory model ─────────────────────────────────────────────────────────

    pub async fn memory_stats(&self) -> MemoryStats {
        let slots: Vec<Arc<SessionSlot>> = self.lock_map().values().cloned().collect();
        let mut stats = MemoryStats {
            sessions: slots.len(),
            active_sse: 0,
            streaming: 0,
            history_entries: 0,
            buffered: 0,
            stale: 0,
        };
        let idle = self.inner.tunables.idle_timeout();
        for slot in slots {
            let st = slot.state.lock().await;
            if st.sse.is_some() {
                stats.active_sse += 1;
            }
            if st.streaming_mode {
                stats.streaming += 1;
            }
            stats.history_entries += st.history.len();
            stats.buffered += st.pending.len();
            if st.last_activity.elapsed() > idle {
                stats.stale += 1;
            }
        }
        stats
    }

    /// Evict sessions idle beyond the threshold, skipping any with an active
    /// SSE attachment or in streaming mode. An aggressive sweep halves the
    /// threshold. Returns the number evicted.
    pub async fn sweep(&self, aggressive: bool) -> usize {
        let mut threshold = self.inner.tunables.idle_timeout();
        if aggressive {
            threshold /= 2;
        }
        let slots: Vec<(Uuid, Arc<SessionSlot>)> = self
            .lock_map()
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        let mut evicted = 0;
        for (id, slot) in slots {
            let evictable = {
                let st = slot.state.lock().await;
                st.sse.is_none()
                    && !st.streaming_mode
                    && st.last_activity.elapsed() > threshold
            };
            if evictable && self.evict_session(id).await.is_ok() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(evicted, aggressive, "idle sweep");
        }
        evicted
    }

    /// Spawn the periodic sweeper. The handle may be dropped; the task keeps
    /// running for the life of the process.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let store = self.clone();
        let period = store.inner.tunables.sweep_interval();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                store.sweep(false).await;
            }
        })
    }

    // ── Hydration ────────────────────────────────────────────────────────────

    /// Load durable session records and upsert each missing one. Runs once;
    /// later calls are no-ops.
    pub async fn hydrate(&self) {
        if self.inner.hydrated.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.inner.persistence.list_sessions().await {
            Ok(records) => {
                for record in records {
                    if !self.contains(record.id) {
                        self.upsert_session(record).await;
                    }
                }
            }
            Err(e) => warn!("hydration failed: {e}"),
        }
    }

    // ── Background-task progress ─────────────────────────────────────────────

    /// Bind a session to a background task so its updates feed the task's
    /// progress counters.
    pub fn bind_task(&self, session_id: Uuid, task_id: Uuid) {
        self.inner
            .task_bindings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id, task_id);
    }

    async fn update_task_progress(&self, update: &CanonicalUpdate) {
        let task_id = {
            let bindings = self.inner.task_bindings.lock().unwrap_or_else(|e| e.into_inner());
            match bindings.get(&update.session_id) {
                Some(id) => *id,
                None => return,
            }
        };
        let result = async {
            let Some(mut task) = self.inner.persistence.get_task(task_id).await? else {
                return Ok(());
            };
            match &update.payload {
                UpdatePayload::ToolCall(tc) => {
                    task.progress.tool_calls += 1;
                    task.progress.activity = Some(format!("running {}", tc.name));
                }
                UpdatePayload::TurnComplete(t) => {
                    if let Some(usage) = t.usage {
                        task.progress.input_tokens += usage.input_tokens;
                        task.progress.output_tokens += usage.output_tokens;
                    }
                    task.progress.activity = Some("turn complete".into());
                }
                UpdatePayload::AgentMessage(_) => {
                    task.progress.activity = Some("responding".into());
                }
                UpdatePayload::AgentThought(_) => {
                    task.progress.activity = Some("thinking".into());
                }
                _ => {}
            }
            task.progress.last_activity = Some(chrono::Utc::now());
            self.inner.persistence.save_task(&task).await
        }
        .await;
        if let Err(e) = result {
            // Progress is advisory; losing an update is acceptable.
            debug!(task = %task_id, "task progress update failed: {e}");
        }
    }
}

fn push_history(st: &mut SessionState, update: CanonicalUpdate, cap: usize) {
    st.history.push(update);
    if st.history.len() > cap {
        let excess = st.history.len() - cap;
        st.history.drain(0..excess);
    }
}

fn push_pending(st: &mut SessionState, update: CanonicalUpdate, cap: usize) {
    st.pending.push_back(update);
    while st.pending.len() > cap {
        st.pending.pop_front();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
