// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport adapter trait shared by the socket and cloud-api variants.

use async_trait::async_trait;

use crate::error::WaflowError;
use crate::types::{ConnectionId, OutboundContent, SendReceipt, TenantId, TransportKind};

/// Adapter contract for a WhatsApp transport variant.
///
/// Adapters own no routing logic; they translate between the wire and the
/// canonical types, and emit [`crate::types::TransportEvent`]s into the
/// channel handed to them at construction. The router subscribes to that
/// channel rather than registering inline callbacks.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Which transport variant this adapter drives.
    fn kind(&self) -> TransportKind;

    /// Bring up the session for a connection.
    ///
    /// Idempotent: a second start for the same (tenant, connection) reuses
    /// the live session (socket kind) or re-registers configuration
    /// (cloud-api kind, which has no persistent connection).
    async fn start(
        &self,
        connection_id: ConnectionId,
        tenant_id: TenantId,
    ) -> Result<(), WaflowError>;

    /// Send structured content to a recipient phone number.
    ///
    /// Fails with [`WaflowError::Transport`] when there is no live session
    /// (socket) or the remote API rejects the payload (cloud-api); the error
    /// message includes the remote detail when available.
    async fn send(
        &self,
        connection_id: ConnectionId,
        recipient: &str,
        content: &OutboundContent,
    ) -> Result<SendReceipt, WaflowError>;

    /// Acknowledge inbound messages as read on the wire. Best effort; the
    /// caller logs failures and moves on.
    async fn mark_read(
        &self,
        connection_id: ConnectionId,
        chat_id: &str,
        wire_message_ids: &[String],
    ) -> Result<(), WaflowError>;

    /// Release session resources. For the socket kind this performs a
    /// graceful logout and deletes local credential storage.
    async fn stop(
        &self,
        connection_id: ConnectionId,
        tenant_id: TenantId,
    ) -> Result<(), WaflowError>;
}
