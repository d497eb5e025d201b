// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the persisted entities.
//!
//! Status/kind columns are stored as TEXT and parsed back through the strum
//! `FromStr` impls on the waflow-core enums. Timestamps are RFC 3339 TEXT,
//! except `wire_timestamp` which keeps the transport's unix seconds.

use std::str::FromStr;

use waflow_core::types::{
    AgentId, CloudCredentials, ConnectionId, ConnectionStatus, ContactId, ContactStatus,
    DeliveryStatus, Direction, MessageKind, TenantId, TicketId, TicketPriority, TicketStatus,
    TransportKind,
};

/// A configured WhatsApp channel.
#[derive(Debug, Clone)]
pub struct ConnectionRow {
    pub id: ConnectionId,
    pub uuid: String,
    pub tenant_id: TenantId,
    pub name: String,
    pub kind: TransportKind,
    pub phone_number: Option<String>,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub last_connected_at: Option<String>,
    pub cloud: Option<CloudCredentials>,
    pub default_department_id: Option<i64>,
    pub messages_sent: i64,
    pub messages_received: i64,
    pub is_default: bool,
}

/// A tenant-scoped contact identity, unique per (tenant, phone).
#[derive(Debug, Clone)]
pub struct ContactRow {
    pub id: ContactId,
    pub uuid: String,
    pub tenant_id: TenantId,
    pub name: String,
    pub phone_number: String,
    pub push_name: Option<String>,
    pub status: ContactStatus,
    pub source: String,
    pub total_tickets: i64,
    pub total_messages: i64,
    pub last_contact_at: Option<String>,
}

/// A conversation ticket.
#[derive(Debug, Clone)]
pub struct TicketRow {
    pub id: TicketId,
    pub uuid: String,
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
    pub connection_id: ConnectionId,
    pub department_id: Option<i64>,
    pub assigned_agent_id: Option<AgentId>,
    pub ticket_number: i64,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub last_message_direction: Option<Direction>,
    pub unread_messages: i64,
    pub chat_id: String,
    pub first_response_at: Option<String>,
    pub closed_at: Option<String>,
    pub closed_by_agent_id: Option<AgentId>,
    pub close_reason: Option<String>,
    pub transfer_count: i64,
}

/// An append-only message record tied to a ticket.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub uuid: String,
    pub tenant_id: TenantId,
    pub ticket_id: TicketId,
    pub contact_id: ContactId,
    pub connection_id: ConnectionId,
    pub agent_id: Option<AgentId>,
    pub wire_message_id: Option<String>,
    pub body: Option<String>,
    pub kind: MessageKind,
    pub direction: Direction,
    pub status: DeliveryStatus,
    pub status_at: Option<String>,
    pub error_message: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub media_name: Option<String>,
    pub quoted_message_id: Option<i64>,
    pub wire_timestamp: Option<i64>,
}

/// A routing department.
#[derive(Debug, Clone)]
pub struct DepartmentRow {
    pub id: i64,
    pub tenant_id: TenantId,
    pub name: String,
    pub is_default: bool,
}

/// A human agent with ticket bookkeeping counters.
#[derive(Debug, Clone)]
pub struct AgentRow {
    pub id: AgentId,
    pub tenant_id: TenantId,
    pub name: String,
    pub active_tickets: i64,
    pub handled_tickets: i64,
}

/// Parse a TEXT column into one of the strum-backed enums, reporting the
/// column index on failure so rusqlite surfaces a useful error.
pub(crate) fn parse_enum<T>(idx: usize, value: String) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Current time as RFC 3339 for TEXT timestamp columns.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
