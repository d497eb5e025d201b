// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway: cloud webhook intake, the management API, and the
//! realtime WebSocket feed.

pub mod auth;
pub mod handlers;
pub mod server;
pub mod state;
pub mod ws;

pub use server::{build_router, serve};
pub use state::AppState;
