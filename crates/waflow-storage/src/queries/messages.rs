// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message persistence and delivery-status tracking.

use rusqlite::params;
use waflow_core::types::{DeliveryStatus, Direction, MessageKind};
use waflow_core::{AgentId, ConnectionId, ContactId, TenantId, TicketId, WaflowError};

use crate::database::{map_tr_err, Database};
use crate::models::{now_rfc3339, parse_enum, MessageRow};

const COLUMNS: &str = "id, uuid, tenant_id, ticket_id, contact_id, connection_id, agent_id, \
     wire_message_id, body, kind, direction, status, status_at, error_message, media_url, \
     media_type, media_name, quoted_message_id, wire_timestamp";

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    let kind: String = row.get(9)?;
    let direction: String = row.get(10)?;
    let status: String = row.get(11)?;
    Ok(MessageRow {
        id: row.get(0)?,
        uuid: row.get(1)?,
        tenant_id: TenantId(row.get(2)?),
        ticket_id: TicketId(row.get(3)?),
        contact_id: ContactId(row.get(4)?),
        connection_id: ConnectionId(row.get(5)?),
        agent_id: row.get::<_, Option<i64>>(6)?.map(AgentId),
        wire_message_id: row.get(7)?,
        body: row.get(8)?,
        kind: parse_enum::<MessageKind>(9, kind)?,
        direction: parse_enum::<Direction>(10, direction)?,
        status: parse_enum::<DeliveryStatus>(11, status)?,
        status_at: row.get(12)?,
        error_message: row.get(13)?,
        media_url: row.get(14)?,
        media_type: row.get(15)?,
        media_name: row.get(16)?,
        quoted_message_id: row.get(17)?,
        wire_timestamp: row.get(18)?,
    })
}

pub struct NewMessage {
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
    pub error_message: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub media_name: Option<String>,
    pub quoted_message_id: Option<i64>,
    pub wire_timestamp: Option<i64>,
}

impl NewMessage {
    /// A bare inbound message; callers fill media fields as needed.
    pub fn inbound(
        tenant_id: TenantId,
        ticket_id: TicketId,
        contact_id: ContactId,
        connection_id: ConnectionId,
    ) -> Self {
        Self {
            tenant_id,
            ticket_id,
            contact_id,
            connection_id,
            agent_id: None,
            wire_message_id: None,
            body: None,
            kind: MessageKind::Text,
            direction: Direction::Incoming,
            status: DeliveryStatus::Delivered,
            error_message: None,
            media_url: None,
            media_type: None,
            media_name: None,
            quoted_message_id: None,
            wire_timestamp: None,
        }
    }

    /// A bare outbound message in `pending` status.
    pub fn outbound(
        tenant_id: TenantId,
        ticket_id: TicketId,
        contact_id: ContactId,
        connection_id: ConnectionId,
    ) -> Self {
        Self {
            direction: Direction::Outgoing,
            status: DeliveryStatus::Pending,
            ..Self::inbound(tenant_id, ticket_id, contact_id, connection_id)
        }
    }
}

pub async fn insert_message(db: &Database, new: NewMessage) -> Result<MessageRow, WaflowError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO messages (uuid, tenant_id, ticket_id, contact_id, connection_id,
                     agent_id, wire_message_id, body, kind, direction, status, status_at,
                     error_message, media_url, media_type, media_name, quoted_message_id,
                     wire_timestamp, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    new.tenant_id.0,
                    new.ticket_id.0,
                    new.contact_id.0,
                    new.connection_id.0,
                    new.agent_id.map(|a| a.0),
                    new.wire_message_id,
                    new.body,
                    new.kind.to_string(),
                    new.direction.to_string(),
                    new.status.to_string(),
                    now_rfc3339(),
                    new.error_message,
                    new.media_url,
                    new.media_type,
                    new.media_name,
                    new.quoted_message_id,
                    new.wire_timestamp,
                    now_rfc3339(),
                ],
            )?;
            let id = conn.last_insert_rowid();
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"))?;
            Ok(stmt.query_row(params![id], row_to_message)?)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_message(db: &Database, id: i64) -> Result<Option<MessageRow>, WaflowError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"))?;
            match stmt.query_row(params![id], row_to_message) {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Find an inbound message by its wire id, used for duplicate detection.
pub async fn find_by_wire_id(
    db: &Database,
    tenant_id: TenantId,
    wire_message_id: &str,
) -> Result<Option<MessageRow>, WaflowError> {
    let wire_message_id = wire_message_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM messages WHERE tenant_id = ?1 AND wire_message_id = ?2"
            ))?;
            match stmt.query_row(params![tenant_id.0, wire_message_id], row_to_message) {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Apply a delivery receipt by wire id. Status only moves forward:
/// a late `delivered` receipt never demotes a `read` message. Returns the
/// number of rows touched; zero means the receipt referenced an unknown
/// message and should be ignored.
pub async fn update_status_by_wire_id(
    db: &Database,
    connection_id: ConnectionId,
    wire_message_id: &str,
    status: DeliveryStatus,
) -> Result<usize, WaflowError> {
    let wire_message_id = wire_message_id.to_string();
    db.connection()
        .call(move |conn| {
            let rank = |s: DeliveryStatus| match s {
                DeliveryStatus::Pending => 0,
                DeliveryStatus::Sent => 1,
                DeliveryStatus::Delivered => 2,
                DeliveryStatus::Read => 3,
                DeliveryStatus::Failed => 4,
            };
            let affected = conn.execute(
                "UPDATE messages SET status = ?1, status_at = ?2
                 WHERE connection_id = ?3 AND wire_message_id = ?4
                   AND CASE status
                         WHEN 'pending' THEN 0 WHEN 'sent' THEN 1
                         WHEN 'delivered' THEN 2 WHEN 'read' THEN 3 ELSE 4
                       END < ?5",
                params![
                    status.to_string(),
                    now_rfc3339(),
                    connection_id.0,
                    wire_message_id,
                    rank(status),
                ],
            )?;
            Ok(affected)
        })
        .await
        .map_err(map_tr_err)
}

/// Wire ids of inbound messages not yet acknowledged as read, oldest
/// first. Used to ack the chat on the wire when an agent replies.
pub async fn unread_inbound_wire_ids(
    db: &Database,
    ticket_id: TicketId,
) -> Result<Vec<String>, WaflowError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT wire_message_id FROM messages
                 WHERE ticket_id = ?1 AND direction = 'incoming'
                   AND status != 'read' AND wire_message_id IS NOT NULL
                 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![ticket_id.0], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
        .map_err(map_tr_err)
}

/// Mark every inbound message on the ticket as read locally.
pub async fn mark_inbound_read(db: &Database, ticket_id: TicketId) -> Result<usize, WaflowError> {
    db.connection()
        .call(move |conn| {
            let affected = conn.execute(
                "UPDATE messages SET status = 'read', status_at = ?1
                 WHERE ticket_id = ?2 AND direction = 'incoming' AND status != 'read'",
                params![now_rfc3339(), ticket_id.0],
            )?;
            Ok(affected)
        })
        .await
        .map_err(map_tr_err)
}

/// Messages for a ticket in insertion order.
pub async fn list_for_ticket(
    db: &Database,
    ticket_id: TicketId,
) -> Result<Vec<MessageRow>, WaflowError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM messages WHERE ticket_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![ticket_id.0], row_to_message)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::{connections, contacts, tickets};
    use waflow_core::types::TransportKind;

    async fn fixture(db: &Database) -> NewMessage {
        let tenant = TenantId(1);
        let connection = connections::create_connection(db, tenant, "line", TransportKind::Socket)
            .await
            .unwrap();
        let contact = contacts::find_or_create(db, tenant, "5215550001", None)
            .await
            .unwrap();
        let ticket = tickets::create_ticket(
            db,
            tickets::NewTicket {
                tenant_id: tenant,
                contact_id: contact.id,
                connection_id: connection,
                department_id: None,
                chat_id: "5215550001@s.whatsapp.net".into(),
            },
        )
        .await
        .unwrap();
        NewMessage::inbound(tenant, ticket.id, contact.id, connection)
    }

    #[tokio::test]
    async fn insert_and_list_round_trips() {
        let db = Database::open_in_memory().await.unwrap();
        let mut new = fixture(&db).await;
        new.body = Some("hola".into());
        new.wire_message_id = Some("WIRE1".into());
        let ticket_id = new.ticket_id;

        let row = insert_message(&db, new).await.unwrap();
        assert_eq!(row.body.as_deref(), Some("hola"));
        assert_eq!(row.kind, MessageKind::Text);
        assert_eq!(row.status, DeliveryStatus::Delivered);

        let listed = list_for_ticket(&db, ticket_id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, row.id);
    }

    #[tokio::test]
    async fn find_by_wire_id_detects_duplicates() {
        let db = Database::open_in_memory().await.unwrap();
        let mut new = fixture(&db).await;
        new.wire_message_id = Some("WIRE1".into());
        let tenant = new.tenant_id;
        insert_message(&db, new).await.unwrap();

        assert!(find_by_wire_id(&db, tenant, "WIRE1").await.unwrap().is_some());
        assert!(find_by_wire_id(&db, tenant, "WIRE2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_receipts_only_move_forward() {
        let db = Database::open_in_memory().await.unwrap();
        let mut new = fixture(&db).await;
        new.direction = Direction::Outgoing;
        new.status = DeliveryStatus::Sent;
        new.wire_message_id = Some("WIRE1".into());
        let connection_id = new.connection_id;
        let row = insert_message(&db, new).await.unwrap();

        let n = update_status_by_wire_id(&db, connection_id, "WIRE1", DeliveryStatus::Read)
            .await
            .unwrap();
        assert_eq!(n, 1);

        // Late delivered receipt is a no-op.
        let n = update_status_by_wire_id(&db, connection_id, "WIRE1", DeliveryStatus::Delivered)
            .await
            .unwrap();
        assert_eq!(n, 0);
        let row = get_message(&db, row.id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Read);

        // Unknown wire id touches nothing.
        let n = update_status_by_wire_id(&db, connection_id, "NOPE", DeliveryStatus::Read)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn inbound_read_ack_tracking() {
        let db = Database::open_in_memory().await.unwrap();
        let mut new = fixture(&db).await;
        new.wire_message_id = Some("WIRE1".into());
        let ticket_id = new.ticket_id;
        insert_message(&db, new).await.unwrap();

        let pending = unread_inbound_wire_ids(&db, ticket_id).await.unwrap();
        assert_eq!(pending, vec!["WIRE1".to_string()]);

        assert_eq!(mark_inbound_read(&db, ticket_id).await.unwrap(), 1);
        assert!(unread_inbound_wire_ids(&db, ticket_id).await.unwrap().is_empty());
    }
}
