// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contact lookup, creation, and counter updates.
//!
//! `find_or_create` runs its select-then-insert inside a single writer
//! call, so two racing inbound messages for the same phone number cannot
//! create duplicate rows.

use rusqlite::params;
use waflow_core::types::ContactStatus;
use waflow_core::{ContactId, TenantId, WaflowError};

use crate::database::{is_constraint_violation, map_tr_err, Database};
use crate::models::{now_rfc3339, parse_enum, ContactRow};

const COLUMNS: &str = "id, uuid, tenant_id, name, phone_number, push_name, status, source, \
     total_tickets, total_messages, last_contact_at";

fn row_to_contact(row: &rusqlite::Row<'_>) -> Result<ContactRow, rusqlite::Error> {
    let status: String = row.get(6)?;
    Ok(ContactRow {
        id: ContactId(row.get(0)?),
        uuid: row.get(1)?,
        tenant_id: TenantId(row.get(2)?),
        name: row.get(3)?,
        phone_number: row.get(4)?,
        push_name: row.get(5)?,
        status: parse_enum::<ContactStatus>(6, status)?,
        source: row.get(7)?,
        total_tickets: row.get(8)?,
        total_messages: row.get(9)?,
        last_contact_at: row.get(10)?,
    })
}

fn select_by_phone(
    conn: &rusqlite::Connection,
    tenant_id: TenantId,
    phone_number: &str,
) -> Result<Option<ContactRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM contacts WHERE tenant_id = ?1 AND phone_number = ?2"
    ))?;
    match stmt.query_row(params![tenant_id.0, phone_number], row_to_contact) {
        Ok(row) => Ok(Some(row)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn find_by_phone(
    db: &Database,
    tenant_id: TenantId,
    phone_number: &str,
) -> Result<Option<ContactRow>, WaflowError> {
    let phone_number = phone_number.to_string();
    db.connection()
        .call(move |conn| Ok(select_by_phone(conn, tenant_id, &phone_number)?))
        .await
        .map_err(map_tr_err)
}

pub async fn get_contact(db: &Database, id: ContactId) -> Result<Option<ContactRow>, WaflowError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COLUMNS} FROM contacts WHERE id = ?1"))?;
            match stmt.query_row(params![id.0], row_to_contact) {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Create a contact; fails with `Conflict` if the (tenant, phone) pair
/// already exists.
pub async fn create_contact(
    db: &Database,
    tenant_id: TenantId,
    name: &str,
    phone_number: &str,
) -> Result<ContactId, WaflowError> {
    let name = name.to_string();
    let phone = phone_number.to_string();
    let result = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO contacts (uuid, tenant_id, name, phone_number, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    tenant_id.0,
                    name,
                    phone,
                    now_rfc3339(),
                ],
            )?;
            Ok(ContactId(conn.last_insert_rowid()))
        })
        .await;

    match result {
        Ok(id) => Ok(id),
        Err(e) if is_constraint_violation(&e) => Err(WaflowError::Conflict(format!(
            "contact with phone {phone_number} already exists for tenant {tenant_id}"
        ))),
        Err(e) => Err(map_tr_err(e)),
    }
}

/// Find the contact for a phone number, creating it when missing. A new
/// contact's name starts as its phone number until a display name is
/// adopted from the wire.
pub async fn find_or_create(
    db: &Database,
    tenant_id: TenantId,
    phone_number: &str,
    push_name: Option<&str>,
) -> Result<ContactRow, WaflowError> {
    let phone = phone_number.to_string();
    let push_name = push_name.map(str::to_string);
    db.connection()
        .call(move |conn| {
            if let Some(existing) = select_by_phone(conn, tenant_id, &phone)? {
                return Ok(existing);
            }
            conn.execute(
                "INSERT INTO contacts (uuid, tenant_id, name, phone_number, push_name, created_at)
                 VALUES (?1, ?2, ?3, ?3, ?4, ?5)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    tenant_id.0,
                    phone,
                    push_name,
                    now_rfc3339(),
                ],
            )?;
            match select_by_phone(conn, tenant_id, &phone)? {
                Some(row) => Ok(row),
                None => Err(rusqlite::Error::QueryReturnedNoRows.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Adopt a display name from the wire, but only while the contact is still
/// named after its phone number. Manual renames are never overwritten.
pub async fn adopt_display_name(
    db: &Database,
    id: ContactId,
    display_name: &str,
) -> Result<bool, WaflowError> {
    let display_name = display_name.to_string();
    db.connection()
        .call(move |conn| {
            let affected = conn.execute(
                "UPDATE contacts SET name = ?1, push_name = ?1
                 WHERE id = ?2 AND name = phone_number",
                params![display_name, id.0],
            )?;
            Ok(affected > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Bump the message counter and last-contact stamp.
pub async fn record_message(db: &Database, id: ContactId) -> Result<(), WaflowError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE contacts
                 SET total_messages = total_messages + 1, last_contact_at = ?1
                 WHERE id = ?2",
                params![now_rfc3339(), id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Bump the ticket counter when a new ticket is opened for the contact.
pub async fn increment_tickets(db: &Database, id: ContactId) -> Result<(), WaflowError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE contacts SET total_tickets = total_tickets + 1 WHERE id = ?1",
                params![id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent() {
        let db = setup().await;
        let first = find_or_create(&db, TenantId(1), "5215550001", Some("Ana"))
            .await
            .unwrap();
        let second = find_or_create(&db, TenantId(1), "5215550001", None)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.name, "5215550001");
        assert_eq!(first.push_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn same_phone_different_tenant_is_distinct() {
        let db = setup().await;
        let a = find_or_create(&db, TenantId(1), "5215550001", None)
            .await
            .unwrap();
        let b = find_or_create(&db, TenantId(2), "5215550001", None)
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn create_contact_conflicts_on_duplicate_phone() {
        let db = setup().await;
        create_contact(&db, TenantId(1), "Ana", "5215550001")
            .await
            .unwrap();
        let err = create_contact(&db, TenantId(1), "Other", "5215550001")
            .await
            .unwrap_err();
        assert!(matches!(err, WaflowError::Conflict(_)));
    }

    #[tokio::test]
    async fn display_name_adopted_only_while_unnamed() {
        let db = setup().await;
        let contact = find_or_create(&db, TenantId(1), "5215550001", None)
            .await
            .unwrap();

        assert!(adopt_display_name(&db, contact.id, "Ana Flores")
            .await
            .unwrap());
        let row = get_contact(&db, contact.id).await.unwrap().unwrap();
        assert_eq!(row.name, "Ana Flores");

        // A later push name must not clobber the adopted one.
        assert!(!adopt_display_name(&db, contact.id, "Spoofed")
            .await
            .unwrap());
        let row = get_contact(&db, contact.id).await.unwrap().unwrap();
        assert_eq!(row.name, "Ana Flores");
    }

    #[tokio::test]
    async fn record_message_bumps_counters() {
        let db = setup().await;
        let contact = find_or_create(&db, TenantId(1), "5215550001", None)
            .await
            .unwrap();
        record_message(&db, contact.id).await.unwrap();
        record_message(&db, contact.id).await.unwrap();
        increment_tickets(&db, contact.id).await.unwrap();
        let row = get_contact(&db, contact.id).await.unwrap().unwrap();
        assert_eq!(row.total_messages, 2);
        assert_eq!(row.total_tickets, 1);
        assert!(row.last_contact_at.is_some());
    }
}
