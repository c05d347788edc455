// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::rpc;
use crate::state::AppState;

/// Build the full HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/acp", post(acp_rpc).get(acp_sse))
        .route("/background-tasks", post(task_enqueue).get(task_list))
        .route("/background-tasks/:id", axum::routing::delete(task_cancel))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── /acp JSON-RPC ─────────────────────────────────────────────────────────────

async fn acp_rpc(State(state): State<Arc<AppState>>, body: String) -> Response {
    let request: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            let resp = json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": {"code": -32700, "message": format!("parse error: {e}")}
            });
            return Json(resp).into_response();
        }
    };
    Json(rpc::dispatch(&state, &request).await).into_response()
}

// ── /acp SSE ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SseQuery {
    #[serde(rename = "sessionId")]
    session_id: Uuid,
}

/// Attach the SSE listener for one session. Each frame is a JSON-RPC
/// notification envelope carrying one canonical update.
async fn acp_sse(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, StatusCode> {
    let session_id = query.session_id;
    let mut updates = state
        .store
        .attach_sse(session_id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    info!(session = %session_id, "SSE listener attached");

    let stream = async_stream::stream! {
        while let Some(update) = updates.recv().await {
            let envelope = json!({
                "jsonrpc": "2.0",
                "method": "session/update",
                "params": {"sessionId": session_id, "update": update}
            });
            match serde_json::to_string(&envelope) {
                Ok(data) => yield Ok(Event::default().data(data)),
                Err(e) => warn!(session = %session_id, "SSE frame not serialisable: {e}"),
            }
        }
        info!(session = %session_id, "SSE stream ended");
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ── /background-tasks ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EnqueueBody {
    #[serde(rename = "workspaceId")]
    workspace_id: String,
    #[serde(rename = "agentId")]
    agent_id: String,
    prompt: String,
}

async fn task_enqueue(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnqueueBody>,
) -> Response {
    match state
        .queue
        .enqueue(&body.workspace_id, &body.agent_id, &body.prompt)
        .await
    {
        Ok(id) => (StatusCode::CREATED, Json(json!({"taskId": id}))).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct ListQuery {
    workspace: Option<String>,
}

async fn task_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state.queue.list(query.workspace.as_deref()).await {
        Ok(tasks) => Json(json!({"tasks": tasks})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn task_cancel(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.queue.cancel(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use maestro_config::Config;
    use maestro_orch::ChildLauncher;
    use maestro_store::MemoryPersistence;
    use maestro_trace::MemoryTraceSink;
    use maestro_types::{Result as CoreResult, SessionRecord};
    use tower::ServiceExt;

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

    fn app() -> Router {
        let state = AppState::build_with(
            Arc::new(Config::default()),
            Arc::new(MemoryPersistence::new()),
            Arc::new(MemoryTraceSink::new()),
            Some(Arc::new(NullLauncher)),
        );
        router(state)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn rpc_endpoint_answers_initialize() {
        let app = app();
        let request = Request::post("/acp")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["result"]["agent"]["name"], "maestro");
    }

    #[tokio::test]
    async fn rpc_endpoint_rejects_malformed_json() {
        let app = app();
        let request = Request::post("/acp")
            .body(Body::from("this is not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn sse_for_unknown_session_is_404() {
        let app = app();
        let request = Request::get(format!("/acp?sessionId={}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn background_task_lifecycle_over_rest() {
        let app = app();

        // Enqueue.
        let request = Request::post("/background-tasks")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"workspaceId":"ws","agentId":"claude","prompt":"do it"}"#,
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        let task_id = body["taskId"].as_str().unwrap().to_string();

        // List.
        let request = Request::get("/background-tasks?workspace=ws")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["tasks"].as_array().unwrap().len(), 1);
        assert_eq!(body["tasks"][0]["status"], "PENDING");

        // Cancel.
        let request = Request::delete(format!("/background-tasks/{task_id}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // Cancelling again is a client error.
        let request = Request::delete(format!("/background-tasks/{task_id}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
