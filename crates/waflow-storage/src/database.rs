// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread. Query modules accept `&Database` and call through `connection()`.
//! Do NOT create additional Connection instances for writes.

use tracing::debug;
use waflow_core::WaflowError;

use crate::migrations;

/// Handle to the SQLite database.
///
/// Wraps a single `tokio_rusqlite::Connection`; everything funnels through
/// its background thread, which eliminates SQLITE_BUSY under concurrent
/// access and makes multi-statement query closures atomic with respect to
/// each other.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (creating if necessary) the database at `path`, apply PRAGMAs,
    /// and run pending migrations.
    pub async fn open(path: &str) -> Result<Self, WaflowError> {
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(map_tr_err)?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )?;
            migrations::run_migrations(conn)
                .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        debug!(path, "database opened");
        Ok(Self { conn })
    }

    /// Open an in-memory database. Test helper.
    pub async fn open_in_memory() -> Result<Self, WaflowError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(map_tr_err)?;
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            migrations::run_migrations(conn)
                .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
        Ok(Self { conn })
    }

    /// The underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(&self) -> Result<(), WaflowError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }
}

/// Map a tokio-rusqlite error into the storage error variant.
pub fn map_tr_err(e: tokio_rusqlite::Error) -> WaflowError {
    WaflowError::Storage {
        source: Box::new(e),
    }
}

/// True when the error is a SQLite uniqueness/constraint violation; used to
/// translate duplicate inserts into [`WaflowError::Conflict`].
pub fn is_constraint_violation(e: &tokio_rusqlite::Error) -> bool {
    match e {
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(err, _)) => {
            err.code == rusqlite::ErrorCode::ConstraintViolation
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_runs_migrations() {
        let db = Database::open_in_memory().await.unwrap();
        let tables: Vec<String> = db
            .connection()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                let mut names = Vec::new();
                for row in rows {
                    names.push(row?);
                }
                Ok(names)
            })
            .await
            .unwrap();

        for table in ["connections", "contacts", "tickets", "messages", "departments", "agents"] {
            assert!(tables.iter().any(|t| t == table), "missing table {table}");
        }
    }

    #[tokio::test]
    async fn open_on_disk_is_reopenable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.db");
        let path = path.to_str().unwrap();

        let db = Database::open(path).await.unwrap();
        db.close().await.unwrap();

        // Second open must not fail on already-applied migrations.
        let db = Database::open(path).await.unwrap();
        db.close().await.unwrap();
    }
}
