// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Department lookups for routing new tickets.

use rusqlite::params;
use waflow_core::{TenantId, WaflowError};

use crate::database::{map_tr_err, Database};
use crate::models::DepartmentRow;

fn row_to_department(row: &rusqlite::Row<'_>) -> Result<DepartmentRow, rusqlite::Error> {
    Ok(DepartmentRow {
        id: row.get(0)?,
        tenant_id: TenantId(row.get(1)?),
        name: row.get(2)?,
        is_default: row.get::<_, i64>(3)? != 0,
    })
}

pub async fn create_department(
    db: &Database,
    tenant_id: TenantId,
    name: &str,
    is_default: bool,
) -> Result<i64, WaflowError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO departments (tenant_id, name, is_default) VALUES (?1, ?2, ?3)",
                params![tenant_id.0, name, is_default as i64],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// The tenant's default department, used when a connection has none of
/// its own configured.
pub async fn default_for_tenant(
    db: &Database,
    tenant_id: TenantId,
) -> Result<Option<DepartmentRow>, WaflowError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, tenant_id, name, is_default FROM departments
                 WHERE tenant_id = ?1 AND is_default = 1 LIMIT 1",
            )?;
            match stmt.query_row(params![tenant_id.0], row_to_department) {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(map_tr_err)
}
