// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket realtime feed.
//!
//! Clients subscribe to scopes over the socket and receive every event
//! the notifier publishes to them, as
//! `{"scope": "...", "event": "...", "payload": {...}}` frames.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use waflow_core::{AgentId, TenantId, TicketId};
use waflow_notify::{Event, Scope};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientCommand {
    Subscribe { scope: ScopeSpec },
    Unsubscribe { scope: ScopeSpec },
}

#[derive(Debug, Deserialize)]
struct ScopeSpec {
    kind: String,
    id: i64,
}

impl ScopeSpec {
    fn to_scope(&self) -> Option<Scope> {
        match self.kind.as_str() {
            "tenant" => Some(Scope::Tenant(TenantId(self.id))),
            "ticket" => Some(Scope::Ticket(TicketId(self.id))),
            "agent" => Some(Scope::Agent(AgentId(self.id))),
            _ => None,
        }
    }
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(expected) = state.auth_token.as_deref() {
        if query.token.as_deref() != Some(expected) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    ws.on_upgrade(move |socket| client_session(state, socket))
}

async fn client_session(state: AppState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<(Scope, Event)>(64);
    let mut forwarders: HashMap<Scope, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let Some(Ok(message)) = incoming else { break };
                let Message::Text(text) = message else { continue };
                let command = match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => command,
                    Err(e) => {
                        debug!(error = %e, "ignoring malformed ws command");
                        continue;
                    }
                };
                match command {
                    ClientCommand::Subscribe { scope: spec } => {
                        let Some(scope) = spec.to_scope() else {
                            warn!(kind = %spec.kind, "unknown scope kind in subscribe");
                            continue;
                        };
                        if forwarders.contains_key(&scope) {
                            continue;
                        }
                        let mut receiver = state.notifier.subscribe(scope.clone());
                        let tx = tx.clone();
                        let task_scope = scope.clone();
                        let task = tokio::spawn(async move {
                            loop {
                                match receiver.recv().await {
                                    Ok(event) => {
                                        if tx.send((task_scope.clone(), event)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                        warn!(scope = %task_scope, skipped = n, "ws subscriber lagged");
                                    }
                                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                                }
                            }
                        });
                        forwarders.insert(scope.clone(), task);
                        let ack = json!({"subscribed": scope.to_string()}).to_string();
                        if sink.send(Message::Text(ack.into())).await.is_err() {
                            break;
                        }
                    }
                    ClientCommand::Unsubscribe { scope: spec } => {
                        if let Some(scope) = spec.to_scope() {
                            if let Some(task) = forwarders.remove(&scope) {
                                task.abort();
                            }
                        }
                    }
                }
            }
            outgoing = rx.recv() => {
                let Some((scope, event)) = outgoing else { break };
                let frame = json!({
                    "scope": scope.to_string(),
                    "event": event.name,
                    "payload": event.payload,
                })
                .to_string();
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    for (_, task) in forwarders {
        task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_command_parses() {
        let command: ClientCommand =
            serde_json::from_str(r#"{"action":"subscribe","scope":{"kind":"ticket","id":7}}"#)
                .unwrap();
        match command {
            ClientCommand::Subscribe { scope } => {
                assert_eq!(scope.to_scope(), Some(Scope::Ticket(TicketId(7))));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn unknown_scope_kind_is_none() {
        let spec = ScopeSpec {
            kind: "galaxy".into(),
            id: 1,
        };
        assert!(spec.to_scope().is_none());
    }
}
