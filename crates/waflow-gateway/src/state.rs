// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use waflow_notify::Notifier;
use waflow_router::Router;
use waflow_storage::Database;
use waflow_transport::CloudTransport;

/// Shared handler state. Cheap to clone; everything inside is a handle.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub router: Arc<Router>,
    pub notifier: Notifier,
    pub cloud: Arc<CloudTransport>,
    /// When set, /v1 routes require this bearer token.
    pub auth_token: Option<String>,
}
