// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! HTTP surface of the runtime.
//!
//! One endpoint does the heavy lifting: `POST /acp` accepts JSON-RPC 2.0
//! (`initialize`, `session/new`, `session/prompt`, `session/load`, plus
//! `_`-prefixed extension methods), and `GET /acp?sessionId=…` streams that
//! session's canonical updates as server-sent events. Background tasks get
//! a small REST surface of their own.

mod routes;
mod rpc;
mod state;

pub use routes::router;
pub use state::AppState;

use std::net::SocketAddr;

use tracing::info;

/// Bind and serve until ctrl-c. Hydrates the store, starts the sweeper and
/// the background worker before accepting traffic.
pub async fn serve(state: std::sync::Arc<AppState>) -> anyhow::Result<()> {
    state.store.hydrate().await;
    state.store.spawn_sweeper();
    state.worker.start();

    let port = state.config.server.port;
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "maestro server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}
