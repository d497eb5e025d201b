// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared across transport adapters, the router, and storage.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Identifier of an isolated customer organization. All core entities are
/// scoped by tenant id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub i64);

/// Identifier of one configured WhatsApp channel belonging to a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub i64);

/// Identifier of a tenant-scoped contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactId(pub i64);

/// Identifier of a conversation ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(pub i64);

/// Identifier of an agent (human operator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub i64);

macro_rules! impl_id_display {
    ($($t:ty),*) => {
        $(impl std::fmt::Display for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        })*
    };
}

impl_id_display!(TenantId, ConnectionId, ContactId, TicketId, AgentId);

/// The two transport variants a connection can be configured with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Long-lived QR-paired socket session (one per tenant-connection).
    Socket,
    /// Stateless HTTPS Cloud API client plus inbound webhook delivery.
    CloudApi,
}

/// Connection status state machine.
///
/// Socket kind walks `disconnected -> connecting -> (qr_pending <-> connecting)
/// -> connected`; cloud-api kind jumps straight between `disconnected` and
/// `connected` on operator action.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    QrPending,
    Connected,
    Error,
}

/// Ticket lifecycle status. At most one ticket per (tenant, contact) may be
/// in `pending` or `open` at any instant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    Open,
    Closed,
    Resolved,
}

impl TicketStatus {
    /// True for the statuses that count as "open" for routing purposes.
    pub fn is_active(self) -> bool {
        matches!(self, TicketStatus::Pending | TicketStatus::Open)
    }
}

/// Ticket priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Contact status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Active,
    Blocked,
    Archived,
}

/// Message direction relative to the platform.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Delivery status of a persisted message. The only mutable part of a
/// message record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

/// Canonical message kinds. Unknown wire types degrade to `Text`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Contact,
    Template,
    Interactive,
    Reaction,
    System,
}

/// The one canonical inbound message shape, independent of transport origin.
///
/// Produced by the per-transport normalizers. `body` already carries the
/// caption fallback applied by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Wire message id as reported by the transport.
    pub external_id: String,
    pub kind: MessageKind,
    pub body: String,
    pub caption: Option<String>,
    /// Mime type of an attached media item, when known.
    pub media_type: Option<String>,
    /// URL or provider media identifier. Media bytes are never inlined.
    pub media_ref: Option<String>,
    /// Wire timestamp, unix seconds.
    pub timestamp: i64,
    pub sender_phone: String,
    pub chat_id: String,
    /// Display name the sender reports on the wire, when available.
    pub sender_name: Option<String>,
    pub from_me: bool,
}

/// Outbound content tagged union passed to `Transport::send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundContent {
    Text {
        body: String,
    },
    Image {
        url: String,
        caption: Option<String>,
        mime: Option<String>,
    },
    Video {
        url: String,
        caption: Option<String>,
        mime: Option<String>,
    },
    Audio {
        url: String,
        mime: Option<String>,
    },
    Document {
        url: String,
        filename: Option<String>,
        caption: Option<String>,
        mime: Option<String>,
    },
}

impl OutboundContent {
    /// Canonical message kind for persistence.
    pub fn kind(&self) -> MessageKind {
        match self {
            OutboundContent::Text { .. } => MessageKind::Text,
            OutboundContent::Image { .. } => MessageKind::Image,
            OutboundContent::Video { .. } => MessageKind::Video,
            OutboundContent::Audio { .. } => MessageKind::Audio,
            OutboundContent::Document { .. } => MessageKind::Document,
        }
    }

    /// Text used for the ticket's last-message snapshot and the persisted body.
    pub fn body_text(&self) -> String {
        match self {
            OutboundContent::Text { body } => body.clone(),
            OutboundContent::Image { caption, .. } | OutboundContent::Video { caption, .. } => {
                caption.clone().unwrap_or_default()
            }
            OutboundContent::Audio { .. } => String::new(),
            OutboundContent::Document {
                filename, caption, ..
            } => caption
                .clone()
                .or_else(|| filename.clone())
                .unwrap_or_default(),
        }
    }

    /// Media URL/identifier, if this content carries one.
    pub fn media_ref(&self) -> Option<&str> {
        match self {
            OutboundContent::Text { .. } => None,
            OutboundContent::Image { url, .. }
            | OutboundContent::Video { url, .. }
            | OutboundContent::Audio { url, .. }
            | OutboundContent::Document { url, .. } => Some(url),
        }
    }

    /// Declared mime type, if any.
    pub fn mime(&self) -> Option<&str> {
        match self {
            OutboundContent::Text { .. } => None,
            OutboundContent::Image { mime, .. }
            | OutboundContent::Video { mime, .. }
            | OutboundContent::Audio { mime, .. }
            | OutboundContent::Document { mime, .. } => mime.as_deref(),
        }
    }
}

/// Result of a successful `Transport::send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Wire message id assigned by the transport.
    pub wire_message_id: String,
    /// Provisional status, normally `Sent`.
    pub status: DeliveryStatus,
    /// Unix seconds at which the transport accepted the message.
    pub timestamp: i64,
}

/// Why a socket session closed involuntarily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseCause {
    /// Explicit logout on the paired device. Terminal: credentials are wiped
    /// and no reconnect is attempted.
    LoggedOut,
    /// Transient network loss. Exactly one reconnect is scheduled after the
    /// configured backoff.
    TransportLost,
    /// Anything else; the connection goes to `disconnected` with the cause
    /// recorded as its last error.
    Other(String),
}

impl std::fmt::Display for CloseCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseCause::LoggedOut => write!(f, "logged out"),
            CloseCause::TransportLost => write!(f, "transport lost"),
            CloseCause::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Async events emitted by transport adapters into the router's event channel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Socket kind only: a scannable pairing code is available.
    QrChallenge {
        connection_id: ConnectionId,
        tenant_id: TenantId,
        code: String,
    },
    /// A session reached `connected`, with the resolved phone number.
    SessionOpened {
        connection_id: ConnectionId,
        tenant_id: TenantId,
        phone_number: String,
        display_name: Option<String>,
    },
    /// A session closed, with the classified cause.
    SessionClosed {
        connection_id: ConnectionId,
        tenant_id: TenantId,
        cause: CloseCause,
    },
    /// A normalized inbound message.
    MessageReceived {
        connection_id: ConnectionId,
        tenant_id: TenantId,
        sender_phone: String,
        message: NormalizedMessage,
    },
    /// A delivery status change for a previously sent message.
    MessageStatus {
        connection_id: ConnectionId,
        tenant_id: TenantId,
        wire_message_id: String,
        status: DeliveryStatus,
    },
}

/// Credentials for a cloud-api connection. The socket kind stores an opaque
/// credential directory on disk instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudCredentials {
    pub phone_number_id: String,
    pub business_id: Option<String>,
    pub access_token: String,
    pub webhook_verify_token: Option<String>,
}
