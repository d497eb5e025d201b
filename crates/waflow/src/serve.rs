// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `waflow serve` command implementation.
//!
//! Opens storage, restores previously connected sessions, starts the
//! routing loop, and serves the HTTP/WebSocket gateway until a shutdown
//! signal arrives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use waflow_config::WaflowConfig;
use waflow_core::types::{ConnectionStatus, TransportEvent};
use waflow_core::{Transport, WaflowError};
use waflow_gateway::AppState;
use waflow_notify::Notifier;
use waflow_router::Router;
use waflow_storage::queries::connections;
use waflow_storage::Database;
use waflow_transport::{
    CloudSettings, CloudTransport, SessionRegistry, SocketSettings, SocketTransport,
};

/// Bound on buffered transport events before adapters back off.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Runs the `waflow serve` command.
pub async fn run_serve(config: WaflowConfig) -> Result<(), WaflowError> {
    init_tracing(&config.log.level);

    info!("starting waflow serve");

    let db = Database::open(&config.storage.database_path).await?;
    let notifier = Notifier::new();
    let registry = SessionRegistry::new();
    let (events_tx, events_rx) = mpsc::channel::<TransportEvent>(EVENT_CHANNEL_CAPACITY);

    let socket = Arc::new(SocketTransport::new(
        crate::wire::default_wire_factory(),
        SocketSettings {
            sessions_dir: PathBuf::from(&config.socket.sessions_dir),
            reconnect_backoff: Duration::from_secs(config.socket.reconnect_backoff_secs),
            send_timeout: Duration::from_secs(config.socket.send_timeout_secs),
        },
        events_tx.clone(),
    ));

    let cloud = Arc::new(CloudTransport::new(
        CloudSettings {
            base_url: config.cloud.base_url.clone(),
            send_timeout: Duration::from_secs(config.cloud.send_timeout_secs),
        },
        events_tx.clone(),
    )?);

    restore_sessions(&db, &registry, &socket, &cloud).await?;

    let router = Arc::new(Router::new(db.clone(), notifier.clone(), registry.clone()));
    let event_loop = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.run(events_rx).await })
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| {
            WaflowError::Config(format!(
                "invalid server address {}:{}: {e}",
                config.server.host, config.server.port
            ))
        })?;

    let state = AppState {
        db,
        router,
        notifier,
        cloud,
        auth_token: config.server.bearer_token.clone(),
    };

    waflow_gateway::serve(state, addr, shutdown_signal()).await?;

    event_loop.abort();
    info!("waflow serve stopped");
    Ok(())
}

/// Bring previously configured connections back up on boot.
///
/// Cloud connections re-register their credentials and open immediately.
/// Socket connections that were connected at last shutdown get a start
/// attempt; a failure marks the row errored rather than aborting boot.
async fn restore_sessions(
    db: &Database,
    registry: &SessionRegistry,
    socket: &Arc<SocketTransport>,
    cloud: &Arc<CloudTransport>,
) -> Result<(), WaflowError> {
    for row in connections::list_cloud_configured(db).await? {
        let Some(credentials) = row.cloud.clone() else {
            continue;
        };
        cloud.register(row.id, row.tenant_id, credentials);
        registry.register(row.tenant_id, row.id, Arc::clone(cloud) as Arc<dyn Transport>);
        if let Err(e) = cloud.start(row.id, row.tenant_id).await {
            warn!(connection_id = %row.id, error = %e, "cloud connection failed to start");
            connections::record_session_close(
                db,
                row.id,
                ConnectionStatus::Error,
                Some(&e.to_string()),
            )
            .await?;
        }
    }

    for row in connections::list_restorable_socket(db).await? {
        registry.register(row.tenant_id, row.id, Arc::clone(socket) as Arc<dyn Transport>);
        connections::set_status(db, row.id, ConnectionStatus::Connecting).await?;
        if let Err(e) = socket.start(row.id, row.tenant_id).await {
            error!(connection_id = %row.id, error = %e, "socket session failed to restore");
            connections::record_session_close(
                db,
                row.id,
                ConnectionStatus::Error,
                Some(&e.to_string()),
            )
            .await?;
        }
    }

    info!(sessions = registry.len(), "session restore complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("waflow={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
