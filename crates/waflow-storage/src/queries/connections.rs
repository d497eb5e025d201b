// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection CRUD and status/counter updates.

use rusqlite::params;
use waflow_core::types::{CloudCredentials, ConnectionStatus, TransportKind};
use waflow_core::{ConnectionId, TenantId, WaflowError};

use crate::database::{map_tr_err, Database};
use crate::models::{now_rfc3339, parse_enum, ConnectionRow};

const COLUMNS: &str = "id, uuid, tenant_id, name, kind, phone_number, status, last_error, \
     last_connected_at, cloud_phone_number_id, cloud_business_id, cloud_access_token, \
     cloud_webhook_verify_token, default_department_id, messages_sent, messages_received, \
     is_default";

pub(crate) fn row_to_connection(row: &rusqlite::Row<'_>) -> Result<ConnectionRow, rusqlite::Error> {
    let kind: String = row.get(4)?;
    let status: String = row.get(6)?;
    let cloud_phone_number_id: Option<String> = row.get(9)?;
    let cloud_access_token: Option<String> = row.get(11)?;

    let cloud = match (cloud_phone_number_id, cloud_access_token) {
        (Some(phone_number_id), Some(access_token)) => Some(CloudCredentials {
            phone_number_id,
            business_id: row.get(10)?,
            access_token,
            webhook_verify_token: row.get(12)?,
        }),
        _ => None,
    };

    Ok(ConnectionRow {
        id: ConnectionId(row.get(0)?),
        uuid: row.get(1)?,
        tenant_id: TenantId(row.get(2)?),
        name: row.get(3)?,
        kind: parse_enum::<TransportKind>(4, kind)?,
        phone_number: row.get(5)?,
        status: parse_enum::<ConnectionStatus>(6, status)?,
        last_error: row.get(7)?,
        last_connected_at: row.get(8)?,
        cloud,
        default_department_id: row.get(13)?,
        messages_sent: row.get(14)?,
        messages_received: row.get(15)?,
        is_default: row.get::<_, i64>(16)? != 0,
    })
}

/// Create a connection in `disconnected` status, returning its id.
pub async fn create_connection(
    db: &Database,
    tenant_id: TenantId,
    name: &str,
    kind: TransportKind,
) -> Result<ConnectionId, WaflowError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO connections (uuid, tenant_id, name, kind, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'disconnected', ?5)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    tenant_id.0,
                    name,
                    kind.to_string(),
                    now_rfc3339(),
                ],
            )?;
            Ok(ConnectionId(conn.last_insert_rowid()))
        })
        .await
        .map_err(map_tr_err)
}

/// Get a connection by id.
pub async fn get_connection(
    db: &Database,
    id: ConnectionId,
) -> Result<Option<ConnectionRow>, WaflowError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COLUMNS} FROM connections WHERE id = ?1"))?;
            let result = stmt.query_row(params![id.0], row_to_connection);
            match result {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Find a cloud-api connection by its webhook verify token.
pub async fn find_by_verify_token(
    db: &Database,
    token: &str,
) -> Result<Option<ConnectionRow>, WaflowError> {
    let token = token.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM connections WHERE cloud_webhook_verify_token = ?1"
            ))?;
            let result = stmt.query_row(params![token], row_to_connection);
            match result {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Find a cloud-api connection by the provider's phone-number id, used to
/// resolve webhook deliveries.
pub async fn find_by_phone_number_id(
    db: &Database,
    phone_number_id: &str,
) -> Result<Option<ConnectionRow>, WaflowError> {
    let phone_number_id = phone_number_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM connections WHERE cloud_phone_number_id = ?1"
            ))?;
            let result = stmt.query_row(params![phone_number_id], row_to_connection);
            match result {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Set the status of a connection.
pub async fn set_status(
    db: &Database,
    id: ConnectionId,
    status: ConnectionStatus,
) -> Result<(), WaflowError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE connections SET status = ?1 WHERE id = ?2",
                params![status.to_string(), id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record a session reaching `connected`: status, resolved phone number,
/// last-connected stamp, and a cleared last error.
pub async fn record_session_open(
    db: &Database,
    id: ConnectionId,
    phone_number: &str,
) -> Result<(), WaflowError> {
    let phone_number = phone_number.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE connections
                 SET status = 'connected', phone_number = ?1, last_connected_at = ?2,
                     last_error = NULL
                 WHERE id = ?3",
                params![phone_number, now_rfc3339(), id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record a session close: status plus the cause as `last_error` (pass
/// `None` for voluntary disconnects).
pub async fn record_session_close(
    db: &Database,
    id: ConnectionId,
    status: ConnectionStatus,
    last_error: Option<&str>,
) -> Result<(), WaflowError> {
    let last_error = last_error.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE connections SET status = ?1, last_error = ?2 WHERE id = ?3",
                params![status.to_string(), last_error, id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Store cloud-api credentials on a connection.
pub async fn update_cloud_credentials(
    db: &Database,
    id: ConnectionId,
    creds: &CloudCredentials,
) -> Result<(), WaflowError> {
    let creds = creds.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE connections
                 SET cloud_phone_number_id = ?1, cloud_business_id = ?2,
                     cloud_access_token = ?3, cloud_webhook_verify_token = ?4
                 WHERE id = ?5",
                params![
                    creds.phone_number_id,
                    creds.business_id,
                    creds.access_token,
                    creds.webhook_verify_token,
                    id.0,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Set the connection's default department.
pub async fn set_default_department(
    db: &Database,
    id: ConnectionId,
    department_id: Option<i64>,
) -> Result<(), WaflowError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE connections SET default_department_id = ?1 WHERE id = ?2",
                params![department_id, id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Mark one connection as the tenant default, clearing the flag on every
/// sibling in the same writer call so the single-default invariant holds.
pub async fn set_default_connection(
    db: &Database,
    tenant_id: TenantId,
    id: ConnectionId,
) -> Result<(), WaflowError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE connections SET is_default = 0 WHERE tenant_id = ?1",
                params![tenant_id.0],
            )?;
            tx.execute(
                "UPDATE connections SET is_default = 1 WHERE id = ?1 AND tenant_id = ?2",
                params![id.0, tenant_id.0],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically bump the sent counter.
pub async fn increment_sent(db: &Database, id: ConnectionId) -> Result<(), WaflowError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE connections SET messages_sent = messages_sent + 1 WHERE id = ?1",
                params![id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically bump the received counter.
pub async fn increment_received(db: &Database, id: ConnectionId) -> Result<(), WaflowError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE connections SET messages_received = messages_received + 1 WHERE id = ?1",
                params![id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Socket connections that were connected at last shutdown, for restore.
pub async fn list_restorable_socket(db: &Database) -> Result<Vec<ConnectionRow>, WaflowError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM connections
                 WHERE kind = 'socket' AND status = 'connected'"
            ))?;
            let rows = stmt.query_map([], row_to_connection)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
        .map_err(map_tr_err)
}

/// Cloud connections with stored credentials, for re-registration on boot.
pub async fn list_cloud_configured(db: &Database) -> Result<Vec<ConnectionRow>, WaflowError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM connections
                 WHERE kind = 'cloud_api' AND cloud_access_token IS NOT NULL"
            ))?;
            let rows = stmt.query_map([], row_to_connection)?;
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

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn create_and_get_round_trips() {
        let db = setup().await;
        let id = create_connection(&db, TenantId(1), "Main line", TransportKind::Socket)
            .await
            .unwrap();
        let row = get_connection(&db, id).await.unwrap().unwrap();
        assert_eq!(row.tenant_id, TenantId(1));
        assert_eq!(row.name, "Main line");
        assert_eq!(row.kind, TransportKind::Socket);
        assert_eq!(row.status, ConnectionStatus::Disconnected);
        assert!(row.cloud.is_none());
    }

    #[tokio::test]
    async fn session_open_clears_last_error() {
        let db = setup().await;
        let id = create_connection(&db, TenantId(1), "line", TransportKind::Socket)
            .await
            .unwrap();
        record_session_close(&db, id, ConnectionStatus::Disconnected, Some("boom"))
            .await
            .unwrap();
        let row = get_connection(&db, id).await.unwrap().unwrap();
        assert_eq!(row.last_error.as_deref(), Some("boom"));

        record_session_open(&db, id, "5215550001").await.unwrap();
        let row = get_connection(&db, id).await.unwrap().unwrap();
        assert_eq!(row.status, ConnectionStatus::Connected);
        assert_eq!(row.phone_number.as_deref(), Some("5215550001"));
        assert!(row.last_error.is_none());
        assert!(row.last_connected_at.is_some());
    }

    #[tokio::test]
    async fn default_flag_is_exclusive_per_tenant() {
        let db = setup().await;
        let a = create_connection(&db, TenantId(1), "a", TransportKind::Socket)
            .await
            .unwrap();
        let b = create_connection(&db, TenantId(1), "b", TransportKind::CloudApi)
            .await
            .unwrap();

        set_default_connection(&db, TenantId(1), a).await.unwrap();
        set_default_connection(&db, TenantId(1), b).await.unwrap();

        let row_a = get_connection(&db, a).await.unwrap().unwrap();
        let row_b = get_connection(&db, b).await.unwrap().unwrap();
        assert!(!row_a.is_default);
        assert!(row_b.is_default);
    }

    #[tokio::test]
    async fn cloud_credentials_round_trip_and_lookup() {
        let db = setup().await;
        let id = create_connection(&db, TenantId(2), "cloud", TransportKind::CloudApi)
            .await
            .unwrap();
        let creds = CloudCredentials {
            phone_number_id: "10987".into(),
            business_id: Some("biz-1".into()),
            access_token: "EAAG...".into(),
            webhook_verify_token: Some("verify-me".into()),
        };
        update_cloud_credentials(&db, id, &creds).await.unwrap();

        let by_token = find_by_verify_token(&db, "verify-me").await.unwrap().unwrap();
        assert_eq!(by_token.id, id);
        assert_eq!(by_token.cloud.as_ref().unwrap().phone_number_id, "10987");

        let by_pnid = find_by_phone_number_id(&db, "10987").await.unwrap().unwrap();
        assert_eq!(by_pnid.id, id);

        assert!(find_by_verify_token(&db, "wrong").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counters_increment() {
        let db = setup().await;
        let id = create_connection(&db, TenantId(1), "c", TransportKind::Socket)
            .await
            .unwrap();
        increment_sent(&db, id).await.unwrap();
        increment_sent(&db, id).await.unwrap();
        increment_received(&db, id).await.unwrap();
        let row = get_connection(&db, id).await.unwrap().unwrap();
        assert_eq!(row.messages_sent, 2);
        assert_eq!(row.messages_received, 1);
    }
}
