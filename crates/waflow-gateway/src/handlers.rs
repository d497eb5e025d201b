// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP handlers: cloud webhook endpoints and the management API.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use tracing::{debug, warn};
use waflow_core::types::{OutboundContent, TicketPriority, TicketStatus};
use waflow_core::{AgentId, ConnectionId, TenantId, TicketId, WaflowError};
use waflow_router::SendRequest;
use waflow_storage::queries::tickets::TicketChanges;

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

fn error_response(e: WaflowError) -> Response {
    let status = match &e {
        WaflowError::NotFound { .. } => StatusCode::NOT_FOUND,
        WaflowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WaflowError::Conflict(_) => StatusCode::CONFLICT,
        WaflowError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        WaflowError::Transport { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": e.to_string()}))).into_response()
}

/// Subscription handshake: echo the challenge when the verify token
/// matches a registered connection, otherwise 403.
pub async fn webhook_verify(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == Some("subscribe") {
        if let Some(token) = token {
            if state.cloud.verify_token(token).is_some() {
                debug!("webhook verification accepted");
                return (StatusCode::OK, challenge).into_response();
            }
        }
    }
    warn!("webhook verification rejected");
    StatusCode::FORBIDDEN.into_response()
}

/// Webhook delivery. Always 200: the provider retries on anything else,
/// and a poison payload must not wedge the queue.
pub async fn webhook_receive(State(state): State<AppState>, body: String) -> Response {
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(payload) => state.cloud.ingest_webhook(&payload).await,
        Err(e) => warn!(error = %e, "discarding unparseable webhook body"),
    }
    (StatusCode::OK, Json(json!({"status": "received"}))).into_response()
}

#[derive(Deserialize)]
pub struct SendMessagePayload {
    pub tenant_id: i64,
    #[serde(default)]
    pub ticket_id: Option<i64>,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub agent_id: Option<i64>,
    pub content: OutboundContent,
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(connection_id): Path<i64>,
    Json(payload): Json<SendMessagePayload>,
) -> Response {
    let request = SendRequest {
        tenant_id: TenantId(payload.tenant_id),
        connection_id: ConnectionId(connection_id),
        ticket_id: payload.ticket_id.map(TicketId),
        recipient: payload.recipient,
        agent_id: payload.agent_id.map(AgentId),
        content: payload.content,
    };
    match state.router.send_message(request).await {
        Ok(outcome) => Json(json!({
            "wire_message_id": outcome.receipt.wire_message_id,
            "status": outcome.receipt.status,
            "message_id": outcome.message.map(|m| m.id),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// Distinguishes "field absent" from "field set to null".
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
pub struct UpdateTicketPayload {
    pub tenant_id: i64,
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default)]
    pub priority: Option<TicketPriority>,
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_agent_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub department_id: Option<Option<i64>>,
}

pub async fn update_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<i64>,
    Json(payload): Json<UpdateTicketPayload>,
) -> Response {
    let changes = TicketChanges {
        status: payload.status,
        priority: payload.priority,
        assigned_agent_id: payload.assigned_agent_id.map(|a| a.map(AgentId)),
        department_id: payload.department_id,
    };
    match state
        .router
        .update_ticket(TenantId(payload.tenant_id), TicketId(ticket_id), changes)
        .await
    {
        Ok(ticket) => Json(ticket_body(&ticket)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct CloseTicketPayload {
    pub tenant_id: i64,
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default)]
    pub agent_id: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn close_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<i64>,
    Json(payload): Json<CloseTicketPayload>,
) -> Response {
    let status = payload.status.unwrap_or(TicketStatus::Closed);
    match state
        .router
        .close_ticket(
            TenantId(payload.tenant_id),
            TicketId(ticket_id),
            status,
            payload.agent_id.map(AgentId),
            payload.reason.as_deref(),
        )
        .await
    {
        Ok(ticket) => Json(ticket_body(&ticket)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct TransferTicketPayload {
    pub tenant_id: i64,
    #[serde(default)]
    pub agent_id: Option<i64>,
    #[serde(default)]
    pub department_id: Option<i64>,
}

pub async fn transfer_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<i64>,
    Json(payload): Json<TransferTicketPayload>,
) -> Response {
    match state
        .router
        .transfer_ticket(
            TenantId(payload.tenant_id),
            TicketId(ticket_id),
            payload.agent_id.map(AgentId),
            payload.department_id,
        )
        .await
    {
        Ok(ticket) => Json(ticket_body(&ticket)).into_response(),
        Err(e) => error_response(e),
    }
}

fn ticket_body(ticket: &waflow_storage::TicketRow) -> serde_json::Value {
    json!({
        "ticket_id": ticket.id.0,
        "ticket_number": ticket.ticket_number,
        "status": ticket.status,
        "priority": ticket.priority,
        "assigned_agent_id": ticket.assigned_agent_id.map(|a| a.0),
        "department_id": ticket.department_id,
        "unread_messages": ticket.unread_messages,
        "transfer_count": ticket.transfer_count,
        "close_reason": ticket.close_reason,
    })
}
