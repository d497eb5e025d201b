// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ticket lifecycle queries.
//!
//! Ticket numbers are allocated per tenant from 1001 upward. Allocation
//! and insert happen inside one writer call, which together with the
//! UNIQUE (tenant_id, ticket_number) constraint keeps numbers gapless
//! under concurrent creation.

use rusqlite::params;
use waflow_core::types::{Direction, TicketPriority, TicketStatus};
use waflow_core::{AgentId, ConnectionId, ContactId, TenantId, TicketId, WaflowError};

use crate::database::{map_tr_err, Database};
use crate::models::{now_rfc3339, parse_enum, TicketRow};

const COLUMNS: &str = "id, uuid, tenant_id, contact_id, connection_id, department_id, \
     assigned_agent_id, ticket_number, status, priority, last_message, last_message_at, \
     last_message_direction, unread_messages, chat_id, first_response_at, closed_at, \
     closed_by_agent_id, close_reason, transfer_count";

pub(crate) fn row_to_ticket(row: &rusqlite::Row<'_>) -> Result<TicketRow, rusqlite::Error> {
    let status: String = row.get(8)?;
    let priority: String = row.get(9)?;
    let direction: Option<String> = row.get(12)?;
    Ok(TicketRow {
        id: TicketId(row.get(0)?),
        uuid: row.get(1)?,
        tenant_id: TenantId(row.get(2)?),
        contact_id: ContactId(row.get(3)?),
        connection_id: ConnectionId(row.get(4)?),
        department_id: row.get(5)?,
        assigned_agent_id: row.get::<_, Option<i64>>(6)?.map(AgentId),
        ticket_number: row.get(7)?,
        status: parse_enum::<TicketStatus>(8, status)?,
        priority: parse_enum::<TicketPriority>(9, priority)?,
        last_message: row.get(10)?,
        last_message_at: row.get(11)?,
        last_message_direction: direction
            .map(|d| parse_enum::<Direction>(12, d))
            .transpose()?,
        unread_messages: row.get(13)?,
        chat_id: row.get(14)?,
        first_response_at: row.get(15)?,
        closed_at: row.get(16)?,
        closed_by_agent_id: row.get::<_, Option<i64>>(17)?.map(AgentId),
        close_reason: row.get(18)?,
        transfer_count: row.get(19)?,
    })
}

fn select_ticket(
    conn: &rusqlite::Connection,
    id: TicketId,
) -> Result<Option<TicketRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM tickets WHERE id = ?1"))?;
    match stmt.query_row(params![id.0], row_to_ticket) {
        Ok(row) => Ok(Some(row)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn get_ticket(db: &Database, id: TicketId) -> Result<Option<TicketRow>, WaflowError> {
    db.connection()
        .call(move |conn| Ok(select_ticket(conn, id)?))
        .await
        .map_err(map_tr_err)
}

/// The contact's active ticket, if any. Active means `pending` or `open`;
/// closed and resolved tickets never absorb new messages.
pub async fn find_active_for_contact(
    db: &Database,
    tenant_id: TenantId,
    contact_id: ContactId,
) -> Result<Option<TicketRow>, WaflowError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM tickets
                 WHERE tenant_id = ?1 AND contact_id = ?2 AND status IN ('pending', 'open')
                 ORDER BY id DESC LIMIT 1"
            ))?;
            match stmt.query_row(params![tenant_id.0, contact_id.0], row_to_ticket) {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

pub struct NewTicket {
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
    pub connection_id: ConnectionId,
    pub department_id: Option<i64>,
    pub chat_id: String,
}

/// Create a ticket in `pending`, allocating the next per-tenant ticket
/// number in the same writer call.
pub async fn create_ticket(db: &Database, new: NewTicket) -> Result<TicketRow, WaflowError> {
    db.connection()
        .call(move |conn| {
            let number: i64 = conn.query_row(
                "SELECT COALESCE(MAX(ticket_number), 1000) + 1 FROM tickets WHERE tenant_id = ?1",
                params![new.tenant_id.0],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO tickets (uuid, tenant_id, contact_id, connection_id, department_id,
                                      ticket_number, chat_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    new.tenant_id.0,
                    new.contact_id.0,
                    new.connection_id.0,
                    new.department_id,
                    number,
                    new.chat_id,
                    now_rfc3339(),
                ],
            )?;
            let id = TicketId(conn.last_insert_rowid());
            match select_ticket(conn, id)? {
                Some(row) => Ok(row),
                None => Err(rusqlite::Error::QueryReturnedNoRows.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Record an inbound message on the ticket: last-message snapshot plus an
/// unread bump.
pub async fn record_inbound(
    db: &Database,
    id: TicketId,
    snippet: Option<&str>,
) -> Result<(), WaflowError> {
    let snippet = snippet.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE tickets
                 SET last_message = ?1, last_message_at = ?2,
                     last_message_direction = 'incoming',
                     unread_messages = unread_messages + 1
                 WHERE id = ?3",
                params![snippet, now_rfc3339(), id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record an outbound message: snapshot plus a cleared unread counter,
/// since a reply means the conversation has been seen.
pub async fn record_outbound(
    db: &Database,
    id: TicketId,
    snippet: Option<&str>,
) -> Result<(), WaflowError> {
    let snippet = snippet.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE tickets
                 SET last_message = ?1, last_message_at = ?2,
                     last_message_direction = 'outgoing',
                     unread_messages = 0
                 WHERE id = ?3",
                params![snippet, now_rfc3339(), id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// First agent reply: stamp `first_response_at` once and promote a
/// pending ticket to open. Returns true only on that first transition.
pub async fn mark_first_response(db: &Database, id: TicketId) -> Result<bool, WaflowError> {
    db.connection()
        .call(move |conn| {
            let affected = conn.execute(
                "UPDATE tickets
                 SET first_response_at = ?1,
                     status = CASE WHEN status = 'pending' THEN 'open' ELSE status END
                 WHERE id = ?2 AND first_response_at IS NULL",
                params![now_rfc3339(), id.0],
            )?;
            Ok(affected > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Move a ticket to a terminal status (`closed` or `resolved`), recording
/// who closed it and why. Returns the row as it was before closing so the
/// caller can settle agent counters.
pub async fn close_ticket(
    db: &Database,
    id: TicketId,
    status: TicketStatus,
    closed_by: Option<AgentId>,
    reason: Option<&str>,
) -> Result<TicketRow, WaflowError> {
    debug_assert!(!status.is_active());
    let reason = reason.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let before = match select_ticket(conn, id)? {
                Some(row) => row,
                None => return Err(rusqlite::Error::QueryReturnedNoRows.into()),
            };
            conn.execute(
                "UPDATE tickets
                 SET status = ?1, closed_at = ?2, closed_by_agent_id = ?3,
                     close_reason = ?4, unread_messages = 0
                 WHERE id = ?5",
                params![
                    status.to_string(),
                    now_rfc3339(),
                    closed_by.map(|a| a.0),
                    reason,
                    id.0,
                ],
            )?;
            Ok(before)
        })
        .await
        .map_err(map_tr_err)
}

/// Reassign a ticket to another agent and/or department, bumping the
/// transfer counter. A pending ticket gaining an assignee is promoted to
/// open. Returns the pre-transfer row.
pub async fn transfer_ticket(
    db: &Database,
    id: TicketId,
    to_agent: Option<AgentId>,
    to_department: Option<i64>,
) -> Result<TicketRow, WaflowError> {
    db.connection()
        .call(move |conn| {
            let before = match select_ticket(conn, id)? {
                Some(row) => row,
                None => return Err(rusqlite::Error::QueryReturnedNoRows.into()),
            };
            conn.execute(
                "UPDATE tickets
                 SET assigned_agent_id = ?1,
                     department_id = COALESCE(?2, department_id),
                     transfer_count = transfer_count + 1,
                     status = CASE
                         WHEN status = 'pending' AND ?1 IS NOT NULL THEN 'open'
                         ELSE status
                     END
                 WHERE id = ?3",
                params![to_agent.map(|a| a.0), to_department, id.0],
            )?;
            Ok(before)
        })
        .await
        .map_err(map_tr_err)
}

#[derive(Default)]
pub struct TicketChanges {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub assigned_agent_id: Option<Option<AgentId>>,
    pub department_id: Option<Option<i64>>,
}

/// Apply a partial update. Assigning an agent to a pending ticket
/// promotes it to open.
pub async fn update_ticket(
    db: &Database,
    id: TicketId,
    changes: TicketChanges,
) -> Result<TicketRow, WaflowError> {
    db.connection()
        .call(move |conn| {
            let current = match select_ticket(conn, id)? {
                Some(row) => row,
                None => return Err(rusqlite::Error::QueryReturnedNoRows.into()),
            };

            let mut status = changes.status.unwrap_or(current.status);
            let assigned = changes
                .assigned_agent_id
                .unwrap_or(current.assigned_agent_id);
            if changes.status.is_none()
                && current.status == TicketStatus::Pending
                && current.assigned_agent_id.is_none()
                && assigned.is_some()
            {
                status = TicketStatus::Open;
            }
            let department = changes.department_id.unwrap_or(current.department_id);
            let priority = changes.priority.unwrap_or(current.priority);

            conn.execute(
                "UPDATE tickets
                 SET status = ?1, priority = ?2, assigned_agent_id = ?3, department_id = ?4
                 WHERE id = ?5",
                params![
                    status.to_string(),
                    priority.to_string(),
                    assigned.map(|a| a.0),
                    department,
                    id.0,
                ],
            )?;
            match select_ticket(conn, id)? {
                Some(row) => Ok(row),
                None => Err(rusqlite::Error::QueryReturnedNoRows.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::{connections, contacts};
    use waflow_core::types::TransportKind;

    async fn fixture(db: &Database) -> (TenantId, ContactId, ConnectionId) {
        let tenant = TenantId(1);
        let connection = connections::create_connection(db, tenant, "line", TransportKind::Socket)
            .await
            .unwrap();
        let contact = contacts::find_or_create(db, tenant, "5215550001", None)
            .await
            .unwrap();
        (tenant, contact.id, connection)
    }

    fn new_ticket(tenant: TenantId, contact: ContactId, connection: ConnectionId) -> NewTicket {
        NewTicket {
            tenant_id: tenant,
            contact_id: contact,
            connection_id: connection,
            department_id: None,
            chat_id: "5215550001@s.whatsapp.net".into(),
        }
    }

    #[tokio::test]
    async fn ticket_numbers_start_at_1001_per_tenant() {
        let db = Database::open_in_memory().await.unwrap();
        let (tenant, contact, connection) = fixture(&db).await;

        let t1 = create_ticket(&db, new_ticket(tenant, contact, connection))
            .await
            .unwrap();
        assert_eq!(t1.ticket_number, 1001);
        close_ticket(&db, t1.id, TicketStatus::Closed, None, None).await.unwrap();
        let t2 = create_ticket(&db, new_ticket(tenant, contact, connection))
            .await
            .unwrap();
        assert_eq!(t2.ticket_number, 1002);

        // A second tenant gets its own sequence.
        let other_connection =
            connections::create_connection(&db, TenantId(2), "line", TransportKind::Socket)
                .await
                .unwrap();
        let other_contact = contacts::find_or_create(&db, TenantId(2), "5215550009", None)
            .await
            .unwrap();
        let t3 = create_ticket(&db, new_ticket(TenantId(2), other_contact.id, other_connection))
            .await
            .unwrap();
        assert_eq!(t3.ticket_number, 1001);
    }

    #[tokio::test]
    async fn active_lookup_ignores_closed_tickets() {
        let db = Database::open_in_memory().await.unwrap();
        let (tenant, contact, connection) = fixture(&db).await;

        assert!(find_active_for_contact(&db, tenant, contact)
            .await
            .unwrap()
            .is_none());

        let ticket = create_ticket(&db, new_ticket(tenant, contact, connection))
            .await
            .unwrap();
        let active = find_active_for_contact(&db, tenant, contact)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, ticket.id);

        close_ticket(&db, ticket.id, TicketStatus::Closed, None, Some("done")).await.unwrap();
        assert!(find_active_for_contact(&db, tenant, contact)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn inbound_bumps_unread_and_outbound_clears_it() {
        let db = Database::open_in_memory().await.unwrap();
        let (tenant, contact, connection) = fixture(&db).await;
        let ticket = create_ticket(&db, new_ticket(tenant, contact, connection))
            .await
            .unwrap();

        record_inbound(&db, ticket.id, Some("hola")).await.unwrap();
        record_inbound(&db, ticket.id, Some("estas?")).await.unwrap();
        let row = get_ticket(&db, ticket.id).await.unwrap().unwrap();
        assert_eq!(row.unread_messages, 2);
        assert_eq!(row.last_message.as_deref(), Some("estas?"));
        assert_eq!(row.last_message_direction, Some(Direction::Incoming));

        record_outbound(&db, ticket.id, Some("hola!")).await.unwrap();
        let row = get_ticket(&db, ticket.id).await.unwrap().unwrap();
        assert_eq!(row.unread_messages, 0);
        assert_eq!(row.last_message_direction, Some(Direction::Outgoing));
    }

    #[tokio::test]
    async fn first_response_promotes_and_is_one_shot() {
        let db = Database::open_in_memory().await.unwrap();
        let (tenant, contact, connection) = fixture(&db).await;
        let ticket = create_ticket(&db, new_ticket(tenant, contact, connection))
            .await
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::Pending);

        assert!(mark_first_response(&db, ticket.id).await.unwrap());
        let row = get_ticket(&db, ticket.id).await.unwrap().unwrap();
        assert_eq!(row.status, TicketStatus::Open);
        let first = row.first_response_at.clone().unwrap();

        assert!(!mark_first_response(&db, ticket.id).await.unwrap());
        let row = get_ticket(&db, ticket.id).await.unwrap().unwrap();
        assert_eq!(row.first_response_at.as_deref(), Some(first.as_str()));
    }

    #[tokio::test]
    async fn assigning_pending_ticket_opens_it() {
        let db = Database::open_in_memory().await.unwrap();
        let (tenant, contact, connection) = fixture(&db).await;
        let ticket = create_ticket(&db, new_ticket(tenant, contact, connection))
            .await
            .unwrap();

        let updated = update_ticket(
            &db,
            ticket.id,
            TicketChanges {
                assigned_agent_id: Some(Some(AgentId(7))),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.status, TicketStatus::Open);
        assert_eq!(updated.assigned_agent_id, Some(AgentId(7)));
    }

    #[tokio::test]
    async fn transfer_bumps_counter_and_returns_previous_assignee() {
        let db = Database::open_in_memory().await.unwrap();
        let (tenant, contact, connection) = fixture(&db).await;
        let ticket = create_ticket(&db, new_ticket(tenant, contact, connection))
            .await
            .unwrap();
        update_ticket(
            &db,
            ticket.id,
            TicketChanges {
                assigned_agent_id: Some(Some(AgentId(1))),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let before = transfer_ticket(&db, ticket.id, Some(AgentId(2)), Some(9))
            .await
            .unwrap();
        assert_eq!(before.assigned_agent_id, Some(AgentId(1)));

        let row = get_ticket(&db, ticket.id).await.unwrap().unwrap();
        assert_eq!(row.assigned_agent_id, Some(AgentId(2)));
        assert_eq!(row.department_id, Some(9));
        assert_eq!(row.transfer_count, 1);
    }

    #[tokio::test]
    async fn close_snapshots_prior_state() {
        let db = Database::open_in_memory().await.unwrap();
        let (tenant, contact, connection) = fixture(&db).await;
        let ticket = create_ticket(&db, new_ticket(tenant, contact, connection))
            .await
            .unwrap();
        record_inbound(&db, ticket.id, Some("hola")).await.unwrap();

        let before = close_ticket(&db, ticket.id, TicketStatus::Closed, Some(AgentId(3)), Some("resolved"))
            .await
            .unwrap();
        assert_eq!(before.status, TicketStatus::Pending);
        assert_eq!(before.unread_messages, 1);

        let row = get_ticket(&db, ticket.id).await.unwrap().unwrap();
        assert_eq!(row.status, TicketStatus::Closed);
        assert_eq!(row.closed_by_agent_id, Some(AgentId(3)));
        assert_eq!(row.close_reason.as_deref(), Some("resolved"));
        assert_eq!(row.unread_messages, 0);
        assert!(row.closed_at.is_some());
    }
}
