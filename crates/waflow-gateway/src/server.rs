// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Router assembly and the serve loop.

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::{get, patch, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use waflow_core::WaflowError;

use crate::auth::require_bearer;
use crate::handlers;
use crate::state::AppState;
use crate::ws::ws_upgrade;

/// Assemble the full route tree. Webhook and health stay outside the
/// bearer gate; the provider authenticates with its verify token instead.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/v1/connections/{id}/messages",
            post(handlers::send_message),
        )
        .route("/v1/tickets/{id}", patch(handlers::update_ticket))
        .route("/v1/tickets/{id}/close", post(handlers::close_ticket))
        .route("/v1/tickets/{id}/transfer", post(handlers::transfer_ticket))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/webhook/cloud",
            get(handlers::webhook_verify).post(handlers::webhook_receive),
        )
        .route("/ws", get(ws_upgrade))
        .merge(api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), WaflowError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| WaflowError::Internal(format!("cannot bind {addr}: {e}")))?;
    info!(%addr, "gateway listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| WaflowError::Internal(format!("server error: {e}")))
}
