// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for waflow.
//!
//! All access funnels through a single [`Database`] handle backed by a
//! dedicated writer thread, so multi-statement operations inside one
//! `call` closure are atomic without explicit locking.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
pub use models::{AgentRow, ConnectionRow, ContactRow, DepartmentRow, MessageRow, TicketRow};
