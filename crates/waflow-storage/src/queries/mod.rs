// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per table.

pub mod agents;
pub mod connections;
pub mod contacts;
pub mod departments;
pub mod messages;
pub mod tickets;
