// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Agent workload bookkeeping.

use rusqlite::params;
use waflow_core::{AgentId, TenantId, WaflowError};

use crate::database::{map_tr_err, Database};
use crate::models::AgentRow;

fn row_to_agent(row: &rusqlite::Row<'_>) -> Result<AgentRow, rusqlite::Error> {
    Ok(AgentRow {
        id: AgentId(row.get(0)?),
        tenant_id: TenantId(row.get(1)?),
        name: row.get(2)?,
        active_tickets: row.get(3)?,
        handled_tickets: row.get(4)?,
    })
}

pub async fn create_agent(
    db: &Database,
    tenant_id: TenantId,
    name: &str,
) -> Result<AgentId, WaflowError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO agents (tenant_id, name) VALUES (?1, ?2)",
                params![tenant_id.0, name],
            )?;
            Ok(AgentId(conn.last_insert_rowid()))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_agent(db: &Database, id: AgentId) -> Result<Option<AgentRow>, WaflowError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, tenant_id, name, active_tickets, handled_tickets
                 FROM agents WHERE id = ?1",
            )?;
            match stmt.query_row(params![id.0], row_to_agent) {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Adjust the active-ticket count, clamped at zero so double-closes do
/// not drive it negative.
pub async fn adjust_active(db: &Database, id: AgentId, delta: i64) -> Result<(), WaflowError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE agents SET active_tickets = MAX(0, active_tickets + ?1) WHERE id = ?2",
                params![delta, id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn increment_handled(db: &Database, id: AgentId) -> Result<(), WaflowError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE agents SET handled_tickets = handled_tickets + 1 WHERE id = ?1",
                params![id.0],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
