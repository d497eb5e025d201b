// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Realtime event fan-out.
//!
//! Events are published to scopes (a tenant, a ticket, an agent) and any
//! number of subscribers per scope receive them over tokio broadcast
//! channels. Publishing to a scope nobody watches is a no-op; a slow
//! subscriber that falls more than [`CHANNEL_CAPACITY`] events behind
//! starts losing the oldest ones rather than blocking publishers.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use waflow_core::{AgentId, TenantId, TicketId};

const CHANNEL_CAPACITY: usize = 256;

/// Addressable audience for an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Tenant(TenantId),
    Ticket(TicketId),
    Agent(AgentId),
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Tenant(id) => write!(f, "tenant:{id}"),
            Scope::Ticket(id) => write!(f, "ticket:{id}"),
            Scope::Agent(id) => write!(f, "agent:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum EventName {
    #[serde(rename = "ticket:new")]
    #[strum(serialize = "ticket:new")]
    TicketNew,
    #[serde(rename = "message:new")]
    #[strum(serialize = "message:new")]
    MessageNew,
    #[serde(rename = "message:status")]
    #[strum(serialize = "message:status")]
    MessageStatus,
    #[serde(rename = "ticket:updated")]
    #[strum(serialize = "ticket:updated")]
    TicketUpdated,
    #[serde(rename = "ticket:closed")]
    #[strum(serialize = "ticket:closed")]
    TicketClosed,
    #[serde(rename = "ticket:transferred")]
    #[strum(serialize = "ticket:transferred")]
    TicketTransferred,
    #[serde(rename = "connection:qr")]
    #[strum(serialize = "connection:qr")]
    ConnectionQr,
    #[serde(rename = "connection:status")]
    #[strum(serialize = "connection:status")]
    ConnectionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub name: EventName,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(name: EventName, payload: serde_json::Value) -> Self {
        Self { name, payload }
    }
}

/// Shared fan-out hub. Cheap to clone.
#[derive(Clone, Default)]
pub struct Notifier {
    channels: Arc<DashMap<Scope, broadcast::Sender<Event>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every future event published to `scope`.
    pub fn subscribe(&self, scope: Scope) -> broadcast::Receiver<Event> {
        self.channels
            .entry(scope)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish to a single scope, returning the number of live receivers.
    pub fn publish(&self, scope: &Scope, event: Event) -> usize {
        match self.channels.get(scope) {
            Some(sender) => {
                let delivered = sender.send(event).unwrap_or(0);
                trace!(%scope, receivers = delivered, "published event");
                delivered
            }
            None => 0,
        }
    }

    /// Publish the same event to several scopes.
    pub fn publish_all(&self, scopes: &[Scope], event: &Event) {
        for scope in scopes {
            self.publish(scope, event.clone());
        }
    }

    /// Drop scopes whose last subscriber has gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}
