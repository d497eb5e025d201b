// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Seam between the socket transport and the underlying WhatsApp socket
//! protocol implementation.
//!
//! The transport never talks to the wire library directly; it drives a
//! [`WireClient`] and consumes the [`WireEvent`]s it emits. Production
//! wires a real protocol client in at startup, tests script one.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use waflow_core::types::{DeliveryStatus, OutboundContent, SendReceipt};
use waflow_core::{ConnectionId, WaflowError};

/// Raw events surfaced by a socket protocol client.
#[derive(Debug, Clone)]
pub enum WireEvent {
    /// A fresh pairing code. Emitted repeatedly while unscanned codes
    /// expire and are replaced.
    Qr { code: String },
    /// The session is up and authenticated.
    Connected {
        phone_number: String,
        display_name: Option<String>,
    },
    /// The session dropped. `logged_out` distinguishes a remote device
    /// logout from transient network loss.
    Disconnected {
        logged_out: bool,
        reason: Option<String>,
    },
    /// An inbound message in the wire library's own shape.
    Message(WireMessage),
    /// A delivery receipt for a message this side sent.
    Receipt {
        message_id: String,
        status: DeliveryStatus,
    },
}

/// An inbound socket message before normalization. `content` keeps the
/// wire library's nested message object verbatim; the normalizer picks it
/// apart.
#[derive(Debug, Clone)]
pub struct WireMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_phone: String,
    pub push_name: Option<String>,
    pub from_me: bool,
    /// Unix seconds.
    pub timestamp: i64,
    pub content: serde_json::Value,
}

/// Driver contract for one socket session.
#[async_trait]
pub trait WireClient: Send + Sync + 'static {
    /// Begin connecting, emitting events into `events` as the session
    /// progresses. Returns once the attempt is underway.
    async fn connect(&self, events: mpsc::Sender<WireEvent>) -> Result<(), WaflowError>;

    async fn send(
        &self,
        chat_id: &str,
        content: &OutboundContent,
    ) -> Result<SendReceipt, WaflowError>;

    /// Acknowledge messages as read on the wire.
    async fn mark_read(&self, chat_id: &str, message_ids: &[String]) -> Result<(), WaflowError>;

    /// Log the session out remotely, invalidating stored credentials.
    async fn logout(&self) -> Result<(), WaflowError>;

    /// Tear down the connection without logging out.
    async fn disconnect(&self) -> Result<(), WaflowError>;
}

/// Builds a [`WireClient`] for a connection, pointed at its credential
/// directory.
pub trait WireClientFactory: Send + Sync + 'static {
    fn create(&self, connection_id: ConnectionId, credentials_dir: &Path) -> Arc<dyn WireClient>;
}
