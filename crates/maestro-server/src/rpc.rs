// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::Ordering;
use std::sync::Arc;

use maestro_orch::extract_task_blocks;
use maestro_types::{Block, Error, SessionRecord, SessionRole, StopReason};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;

pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const NOT_INITIALIZED: i64 = -32000;
pub const SESSION_NOT_FOUND: i64 = -32004;
pub const UPSTREAM_ERROR: i64 = -32010;

/// Handle one JSON-RPC request object and produce the response object.
pub async fn dispatch(state: &Arc<AppState>, request: &Value) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);

    if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return error_response(id, INVALID_REQUEST, "expected jsonrpc 2.0");
    }
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return error_response(id, INVALID_REQUEST, "missing method");
    };
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    if method != "initialize" && !state.initialized.load(Ordering::SeqCst) {
        return error_response(id, NOT_INITIALIZED, "call initialize first");
    }

    debug!(method, "rpc");
    let outcome = match method {
        "initialize" => initialize(state),
        "session/new" => session_new(state, &params).await,
        "session/prompt" => session_prompt(state, &params).await,
        "session/load" => session_load(state, &params).await,
        "session/cancel" => session_cancel(state, &params).await,
        "tools/call" => tools_call(state, &params).await,
        "_agents/list" => agents_list(state).await,
        "_agents/status" => agent_status(state, &params).await,
        "_skills/list" => skills_list(state),
        "_skills/load" => skills_load(state, &params),
        "_tasks/extract" => tasks_extract(&params),
        "_memory/stats" => memory_stats(state).await,
        "_session/rename" => session_rename(state, &params).await,
        "_session/mode" => session_mode(state, &params).await,
        other => Err(RpcError::new(METHOD_NOT_FOUND, format!("unknown method: {other}"))),
    };

    match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err(e) => error_response(id, e.code, &e.message),
    }
}

struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl From<Error> for RpcError {
    fn from(e: Error) -> Self {
        let code = match &e {
            Error::InvalidRequest(_) => INVALID_PARAMS,
            Error::NotInitialized => NOT_INITIALIZED,
            Error::SessionNotFound(_) => SESSION_NOT_FOUND,
            _ => UPSTREAM_ERROR,
        };
        Self { code, message: e.to_string() }
    }
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

fn str_param(params: &Value, key: &str) -> Result<String, RpcError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::new(INVALID_PARAMS, format!("missing parameter: {key}")))
}

fn session_id_param(params: &Value) -> Result<Uuid, RpcError> {
    let raw = str_param(params, "sessionId")?;
    raw.parse()
        .map_err(|_| RpcError::new(INVALID_PARAMS, "sessionId is not a UUID"))
}

// ── Methods ───────────────────────────────────────────────────────────────────

fn initialize(state: &Arc<AppState>) -> Result<Value, RpcError> {
    state.initialized.store(true, Ordering::SeqCst);
    Ok(json!({
        "protocolVersion": 1,
        "agent": {"name": "maestro", "version": env!("CARGO_PKG_VERSION")},
        "capabilities": {"sessions": true, "backgroundTasks": true, "delegation": true}
    }))
}

async fn session_new(state: &Arc<AppState>, params: &Value) -> Result<Value, RpcError> {
    let workspace = str_param(params, "workspaceId")?;
    let cwd = str_param(params, "cwd")?;
    let provider = str_param(params, "provider")?;
    let role: SessionRole = params
        .get("role")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|_| RpcError::new(INVALID_PARAMS, "unknown role"))?
        .unwrap_or(SessionRole::Solo);

    let mut record = SessionRecord::new(workspace, cwd, provider, role);
    if let Some(specialist) = params.get("specialist").and_then(Value::as_str) {
        record = record.with_specialist(specialist);
        if let Some(preset) = state.config.specialists.get(specialist) {
            record.system_header = preset.system_header.clone();
        }
    }
    if let Some(parent) = params.get("parentSession").and_then(Value::as_str) {
        let parent: Uuid = parent
            .parse()
            .map_err(|_| RpcError::new(INVALID_PARAMS, "parentSession is not a UUID"))?;
        record = record.with_parent(parent);
    }
    let session_id = record.id;

    state.store.upsert_session(record.clone()).await;
    state.launcher.launch(&record).await?;
    info!(session = %session_id, "session opened via rpc");
    Ok(json!({"sessionId": session_id}))
}

/// Run one prompt to completion, streaming via SSE while the turn runs (the
/// session is put in streaming mode so the dedicated response below is the
/// only delivery of these updates).
async fn session_prompt(state: &Arc<AppState>, params: &Value) -> Result<Value, RpcError> {
    let session_id = session_id_param(params)?;
    let prompt = str_param(params, "prompt")?;

    // Subscribe before anything moves so the turn end cannot be missed.
    let mut events = state.store.subscribe(session_id)?;

    state.store.set_streaming_mode(session_id, true).await?;
    let outcome = run_prompt(state, session_id, &prompt, &mut events).await;
    state.store.flush_agent_buffers(session_id).await;
    let _ = state.store.set_streaming_mode(session_id, false).await;
    outcome
}

async fn run_prompt(
    state: &Arc<AppState>,
    session_id: Uuid,
    prompt: &str,
    events: &mut tokio::sync::broadcast::Receiver<maestro_types::SemanticEvent>,
) -> Result<Value, RpcError> {
    state.store.push_user_message(session_id, prompt).await?;
    state.store.mark_first_prompt_sent(session_id).await?;
    state.launcher.send_prompt(session_id, prompt).await?;

    let budget = state.config.tunables.delegation_turn_timeout();
    let mut content = String::new();
    let wait = async {
        loop {
            match events.recv().await {
                Ok(ev) => match ev.block {
                    Block::MessageBlock { text, .. } => content.push_str(&text),
                    Block::AgentCompleted { stop_reason } => return Ok(stop_reason),
                    Block::AgentFailed { message } => return Err(message),
                    _ => {}
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(session = %session_id, "prompt waiter lagged by {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return Err("session closed".to_string());
                }
            }
        }
    };

    match tokio::time::timeout(budget, wait).await {
        Ok(Ok(stop_reason)) => Ok(json!({
            "stopReason": stop_reason,
            "content": if content.is_empty() { Value::Null } else { Value::String(content) }
        })),
        Ok(Err(message)) => Ok(json!({
            "stopReason": StopReason::Error,
            "error": message
        })),
        Err(_) => Err(RpcError::new(UPSTREAM_ERROR, "prompt timed out")),
    }
}

async fn session_load(state: &Arc<AppState>, params: &Value) -> Result<Value, RpcError> {
    let session_id = session_id_param(params)?;

    if !state.store.contains(session_id) {
        // Resume from the durable record if one exists.
        let record = state
            .store
            .persistence()
            .get_session(session_id)
            .await?
            .ok_or(Error::SessionNotFound(session_id))?;
        state.store.upsert_session(record).await;
    }
    let record = state.store.get_session(session_id).await?;
    let history = state.store.get_consolidated_history(session_id).await?;
    Ok(json!({
        "sessionId": session_id,
        "provider": record.provider,
        "role": record.role,
        "history": history,
    }))
}

async fn session_cancel(state: &Arc<AppState>, params: &Value) -> Result<Value, RpcError> {
    let session_id = session_id_param(params)?;
    state.launcher.cancel(session_id).await?;
    Ok(json!({"cancelled": true}))
}

/// Orchestration helper tools, also reachable via `tools/call`.
async fn tools_call(state: &Arc<AppState>, params: &Value) -> Result<Value, RpcError> {
    let name = str_param(params, "name")?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
    match name.as_str() {
        "list_agents" => agents_list(state).await,
        "create_agent" => session_new(state, &arguments).await,
        "get_agent_status" => agent_status(state, &arguments).await,
        other => Err(RpcError::new(METHOD_NOT_FOUND, format!("unknown tool: {other}"))),
    }
}

async fn agents_list(state: &Arc<AppState>) -> Result<Value, RpcError> {
    let sessions = state.store.list_sessions().await;
    let agents: Vec<Value> = sessions
        .iter()
        .map(|s| {
            json!({
                "sessionId": s.id,
                "provider": s.provider,
                "role": s.role,
                "parent": s.parent,
                "title": s.title,
                "createdAt": s.created_at,
            })
        })
        .collect();
    Ok(json!({"agents": agents}))
}

async fn agent_status(state: &Arc<AppState>, params: &Value) -> Result<Value, RpcError> {
    let session_id = session_id_param(params)?;
    let record = state.store.get_session(session_id).await?;
    let history = state.store.get_history(session_id).await?;
    Ok(json!({
        "sessionId": session_id,
        "provider": record.provider,
        "role": record.role,
        "firstPromptSent": record.first_prompt_sent,
        "historyLength": history.len(),
    }))
}

/// Named skills are the configured specialist presets.
fn skills_list(state: &Arc<AppState>) -> Result<Value, RpcError> {
    let mut skills: Vec<Value> = state
        .config
        .specialists
        .iter()
        .map(|(name, preset)| {
            json!({"name": name, "provider": preset.provider, "role": preset.role})
        })
        .collect();
    skills.sort_by_key(|s| s["name"].as_str().unwrap_or_default().to_string());
    Ok(json!({"skills": skills}))
}

fn skills_load(state: &Arc<AppState>, params: &Value) -> Result<Value, RpcError> {
    let name = str_param(params, "name")?;
    let preset = state
        .config
        .specialists
        .get(&name)
        .ok_or_else(|| RpcError::new(INVALID_PARAMS, format!("unknown skill: {name}")))?;
    Ok(json!({
        "name": name,
        "provider": preset.provider,
        "model": preset.model,
        "role": preset.role,
        "systemHeader": preset.system_header,
    }))
}

fn tasks_extract(params: &Value) -> Result<Value, RpcError> {
    let text = str_param(params, "text")?;
    let extraction = extract_task_blocks(&text);
    Ok(json!({
        "blockCount": extraction.block_count,
        "validTaskCount": extraction.valid_count,
        "invalidBlockCount": extraction.invalid_count,
        "tasks": extraction.tasks,
        "cleanedText": extraction.cleaned_text,
    }))
}

async fn memory_stats(state: &Arc<AppState>) -> Result<Value, RpcError> {
    let stats = state.store.memory_stats().await;
    serde_json::to_value(&stats).map_err(|e| RpcError::new(UPSTREAM_ERROR, e.to_string()))
}

async fn session_rename(state: &Arc<AppState>, params: &Value) -> Result<Value, RpcError> {
    let session_id = session_id_param(params)?;
    let title = str_param(params, "title")?;
    state.store.rename_session(session_id, &title).await?;
    Ok(json!({"renamed": true}))
}

async fn session_mode(state: &Arc<AppState>, params: &Value) -> Result<Value, RpcError> {
    let session_id = session_id_param(params)?;
    let mode = str_param(params, "mode")?;
    state.store.update_mode(session_id, &mode).await?;
    Ok(json!({"mode": mode}))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use maestro_config::Config;
    use maestro_orch::ChildLauncher;
    use maestro_store::MemoryPersistence;
    use maestro_trace::MemoryTraceSink;
    use maestro_types::{
        CanonicalUpdate, MessagePayload, Result as CoreResult, TurnCompletePayload, UpdatePayload,
    };

    /// Launcher that never spawns processes; prompts are "answered" by the
    /// test pushing canonical updates into the store.
    struct NullLauncher;

    #[async_trait]
    impl ChildLauncher for NullLauncher {
        async fn launch(&self, _record: &SessionRecord) -> CoreResult<()> {
            Ok(())
        }
        async fn send_prompt(&self, _session_id: Uuid, _prompt: &str) -> CoreResult<()> {
            Ok(())
        }
        async fn cancel(&self, _session_id: Uuid) -> CoreResult<()> {
            Ok(())
        }
        async fn close(&self, _session_id: Uuid) -> CoreResult<()> {
            Ok(())
        }
    }

    fn state() -> Arc<AppState> {
        AppState::build_with(
            Arc::new(Config::default()),
            Arc::new(MemoryPersistence::new()),
            Arc::new(MemoryTraceSink::new()),
            Some(Arc::new(NullLauncher)),
        )
    }

    fn rpc(method: &str, params: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params})
    }

    async fn init(state: &Arc<AppState>) {
        let resp = dispatch(state, &rpc("initialize", Value::Null)).await;
        assert!(resp["result"]["agent"]["name"].as_str() == Some("maestro"));
    }

    async fn open_session(state: &Arc<AppState>) -> Uuid {
        let resp = dispatch(
            state,
            &rpc(
                "session/new",
                json!({"workspaceId": "ws", "cwd": "/tmp", "provider": "claude", "role": "SOLO"}),
            ),
        )
        .await;
        resp["result"]["sessionId"]
            .as_str()
            .expect("sessionId in result")
            .parse()
            .unwrap()
    }

    // ── Handshake and shape errors ───────────────────────────────────────────

    #[tokio::test]
    async fn methods_before_initialize_are_rejected() {
        let s = state();
        let resp = dispatch(&s, &rpc("session/new", json!({}))).await;
        assert_eq!(resp["error"]["code"], NOT_INITIALIZED);
    }

    #[tokio::test]
    async fn bad_jsonrpc_version_is_invalid_request() {
        let s = state();
        let resp = dispatch(&s, &json!({"jsonrpc": "1.0", "id": 1, "method": "initialize"})).await;
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn missing_params_are_invalid_params() {
        let s = state();
        init(&s).await;
        let resp = dispatch(&s, &rpc("session/new", json!({"workspaceId": "ws"}))).await;
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let s = state();
        init(&s).await;
        let resp = dispatch(&s, &rpc("no/such", json!({}))).await;
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_session_maps_to_not_found_code() {
        let s = state();
        init(&s).await;
        let resp = dispatch(
            &s,
            &rpc("_agents/status", json!({"sessionId": Uuid::new_v4().to_string()})),
        )
        .await;
        assert_eq!(resp["error"]["code"], SESSION_NOT_FOUND);
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn session_new_creates_a_listed_session() {
        let s = state();
        init(&s).await;
        let id = open_session(&s).await;

        let resp = dispatch(&s, &rpc("_agents/list", Value::Null)).await;
        let agents = resp["result"]["agents"].as_array().unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0]["sessionId"], id.to_string());
        assert_eq!(agents[0]["role"], "SOLO");
    }

    #[tokio::test]
    async fn session_prompt_returns_stop_reason_and_content() {
        let s = state();
        init(&s).await;
        let id = open_session(&s).await;

        // "Upstream" answers after a beat.
        let store = s.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            store
                .push_canonical(CanonicalUpdate::new(
                    id,
                    "claude",
                    UpdatePayload::AgentMessage(MessagePayload::chunk("hi there")),
                ))
                .await
                .unwrap();
            store
                .push_canonical(CanonicalUpdate::new(
                    id,
                    "claude",
                    UpdatePayload::TurnComplete(TurnCompletePayload {
                        stop_reason: StopReason::EndTurn,
                        usage: None,
                    }),
                ))
                .await
                .unwrap();
        });

        let resp = dispatch(
            &s,
            &rpc("session/prompt", json!({"sessionId": id.to_string(), "prompt": "hello"})),
        )
        .await;
        assert_eq!(resp["result"]["stopReason"], "end_turn");
        assert_eq!(resp["result"]["content"], "hi there");
    }

    #[tokio::test]
    async fn session_load_resumes_from_persistence() {
        let s = state();
        init(&s).await;
        let record = SessionRecord::new("ws", "/tmp", "claude", SessionRole::Solo);
        let id = record.id;
        s.store.persistence().save_session(&record).await.unwrap();
        assert!(!s.store.contains(id));

        let resp = dispatch(&s, &rpc("session/load", json!({"sessionId": id.to_string()}))).await;
        assert_eq!(resp["result"]["sessionId"], id.to_string());
        assert!(s.store.contains(id));
    }

    // ── Extension methods ────────────────────────────────────────────────────

    #[tokio::test]
    async fn tasks_extract_reports_counts() {
        let s = state();
        init(&s).await;
        let text = "@@@task\n# One\n@@@\n@@@task\nnope\n@@@";
        let resp = dispatch(&s, &rpc("_tasks/extract", json!({"text": text}))).await;
        assert_eq!(resp["result"]["blockCount"], 2);
        assert_eq!(resp["result"]["validTaskCount"], 1);
        assert_eq!(resp["result"]["invalidBlockCount"], 1);
    }

    #[tokio::test]
    async fn memory_stats_exposes_counters() {
        let s = state();
        init(&s).await;
        open_session(&s).await;
        let resp = dispatch(&s, &rpc("_memory/stats", Value::Null)).await;
        assert_eq!(resp["result"]["sessions"], 1);
    }

    #[tokio::test]
    async fn rename_updates_the_listing() {
        let s = state();
        init(&s).await;
        let id = open_session(&s).await;
        dispatch(
            &s,
            &rpc("_session/rename", json!({"sessionId": id.to_string(), "title": "My run"})),
        )
        .await;
        let resp = dispatch(&s, &rpc("_agents/list", Value::Null)).await;
        assert_eq!(resp["result"]["agents"][0]["title"], "My run");
    }

    #[tokio::test]
    async fn skills_list_and_load_expose_presets() {
        let mut config = Config::default();
        config.specialists.insert(
            "rust-impl".into(),
            maestro_config::SpecialistPreset {
                provider: "claude".into(),
                model: Some("opus".into()),
                role: Some(SessionRole::Implementor),
                system_header: "You implement Rust.".into(),
            },
        );
        let s = AppState::build_with(
            Arc::new(config),
            Arc::new(MemoryPersistence::new()),
            Arc::new(MemoryTraceSink::new()),
            Some(Arc::new(NullLauncher)),
        );
        init(&s).await;

        let resp = dispatch(&s, &rpc("_skills/list", Value::Null)).await;
        assert_eq!(resp["result"]["skills"][0]["name"], "rust-impl");

        let resp = dispatch(&s, &rpc("_skills/load", json!({"name": "rust-impl"}))).await;
        assert_eq!(resp["result"]["systemHeader"], "You implement Rust.");
        assert_eq!(resp["result"]["model"], "opus");

        let resp = dispatch(&s, &rpc("_skills/load", json!({"name": "nope"}))).await;
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn tools_call_routes_to_helpers() {
        let s = state();
        init(&s).await;
        open_session(&s).await;
        let resp = dispatch(
            &s,
            &rpc("tools/call", json!({"name": "list_agents", "arguments": {}})),
        )
        .await;
        assert_eq!(resp["result"]["agents"].as_array().unwrap().len(), 1);
    }
}
