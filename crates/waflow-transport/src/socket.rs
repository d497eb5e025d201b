// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! QR-paired socket transport.
//!
//! Each started connection owns a wire client and a pump task that
//! translates its events into canonical transport events. Credentials
//! live in a per-connection directory under the configured sessions dir;
//! a remote logout wipes that directory so the next start pairs fresh.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use waflow_core::types::{
    CloseCause, OutboundContent, SendReceipt, TransportEvent, TransportKind,
};
use waflow_core::{ConnectionId, TenantId, Transport, WaflowError};

use crate::normalize::normalize_socket;
use crate::wire::{WireClient, WireClientFactory, WireEvent};

#[derive(Debug, Clone)]
pub struct SocketSettings {
    pub sessions_dir: PathBuf,
    pub reconnect_backoff: Duration,
    pub send_timeout: Duration,
}

struct ActiveSession {
    tenant_id: TenantId,
    client: Arc<dyn WireClient>,
    pump: JoinHandle<()>,
}

pub struct SocketTransport {
    factory: Arc<dyn WireClientFactory>,
    settings: SocketSettings,
    events: mpsc::Sender<TransportEvent>,
    active: Arc<DashMap<ConnectionId, ActiveSession>>,
}

impl SocketTransport {
    pub fn new(
        factory: Arc<dyn WireClientFactory>,
        settings: SocketSettings,
        events: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            factory,
            settings,
            events,
            active: Arc::new(DashMap::new()),
        }
    }

    fn credentials_dir(&self, connection_id: ConnectionId) -> PathBuf {
        self.settings.sessions_dir.join(format!("conn-{connection_id}"))
    }

    pub fn is_active(&self, connection_id: ConnectionId) -> bool {
        self.active.contains_key(&connection_id)
    }
}

async fn wipe_credentials(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), error = %e, "failed to remove credential directory");
        }
    }
}

/// Forwards wire events for one session until it terminates.
#[allow(clippy::too_many_arguments)]
async fn pump_session(
    connection_id: ConnectionId,
    tenant_id: TenantId,
    client: Arc<dyn WireClient>,
    credentials_dir: PathBuf,
    backoff: Duration,
    events: mpsc::Sender<TransportEvent>,
    active: Arc<DashMap<ConnectionId, ActiveSession>>,
    mut wire_rx: mpsc::Receiver<WireEvent>,
    wire_tx: mpsc::Sender<WireEvent>,
) {
    let mut retried = false;
    while let Some(event) = wire_rx.recv().await {
        match event {
            WireEvent::Qr { code } => {
                let _ = events
                    .send(TransportEvent::QrChallenge {
                        connection_id,
                        tenant_id,
                        code,
                    })
                    .await;
            }
            WireEvent::Connected {
                phone_number,
                display_name,
            } => {
                retried = false;
                info!(%connection_id, %phone_number, "socket session connected");
                let _ = events
                    .send(TransportEvent::SessionOpened {
                        connection_id,
                        tenant_id,
                        phone_number,
                        display_name,
                    })
                    .await;
            }
            WireEvent::Disconnected { logged_out, reason } => {
                if logged_out {
                    info!(%connection_id, "remote logout, wiping credentials");
                    wipe_credentials(&credentials_dir).await;
                    active.remove(&connection_id);
                    let _ = events
                        .send(TransportEvent::SessionClosed {
                            connection_id,
                            tenant_id,
                            cause: CloseCause::LoggedOut,
                        })
                        .await;
                    return;
                }
                let _ = events
                    .send(TransportEvent::SessionClosed {
                        connection_id,
                        tenant_id,
                        cause: CloseCause::TransportLost,
                    })
                    .await;
                if retried {
                    warn!(%connection_id, ?reason, "reconnect failed, giving up");
                    active.remove(&connection_id);
                    return;
                }
                retried = true;
                debug!(%connection_id, backoff = ?backoff, "scheduling single reconnect");
                tokio::time::sleep(backoff).await;
                if let Err(e) = client.connect(wire_tx.clone()).await {
                    warn!(%connection_id, error = %e, "reconnect attempt failed");
                    active.remove(&connection_id);
                    return;
                }
            }
            WireEvent::Message(msg) => {
                if msg.from_me {
                    continue;
                }
                match normalize_socket(&msg) {
                    Some(message) => {
                        let _ = events
                            .send(TransportEvent::MessageReceived {
                                connection_id,
                                tenant_id,
                                sender_phone: message.sender_phone.clone(),
                                message,
                            })
                            .await;
                    }
                    None => {
                        warn!(%connection_id, message_id = %msg.id, "dropping malformed wire message");
                    }
                }
            }
            WireEvent::Receipt { message_id, status } => {
                let _ = events
                    .send(TransportEvent::MessageStatus {
                        connection_id,
                        tenant_id,
                        wire_message_id: message_id,
                        status,
                    })
                    .await;
            }
        }
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn start(
        &self,
        connection_id: ConnectionId,
        tenant_id: TenantId,
    ) -> Result<(), WaflowError> {
        if self.active.contains_key(&connection_id) {
            debug!(%connection_id, "session already active, start is a no-op");
            return Ok(());
        }

        let credentials_dir = self.credentials_dir(connection_id);
        tokio::fs::create_dir_all(&credentials_dir)
            .await
            .map_err(|e| {
                WaflowError::transport(format!(
                    "cannot create credential directory {}: {e}",
                    credentials_dir.display()
                ))
            })?;

        let client = self.factory.create(connection_id, &credentials_dir);
        let (wire_tx, wire_rx) = mpsc::channel(64);
        client.connect(wire_tx.clone()).await?;

        let pump = tokio::spawn(pump_session(
            connection_id,
            tenant_id,
            client.clone(),
            credentials_dir,
            self.settings.reconnect_backoff,
            self.events.clone(),
            self.active.clone(),
            wire_rx,
            wire_tx,
        ));
        self.active.insert(
            connection_id,
            ActiveSession {
                tenant_id,
                client,
                pump,
            },
        );
        Ok(())
    }

    async fn send(
        &self,
        connection_id: ConnectionId,
        recipient: &str,
        content: &OutboundContent,
    ) -> Result<SendReceipt, WaflowError> {
        let client = match self.active.get(&connection_id) {
            Some(session) => session.client.clone(),
            None => {
                return Err(WaflowError::transport(format!(
                    "no live socket session for connection {connection_id}"
                )))
            }
        };
        let chat_id = if recipient.contains('@') {
            recipient.to_string()
        } else {
            format!("{recipient}@s.whatsapp.net")
        };
        match tokio::time::timeout(self.settings.send_timeout, client.send(&chat_id, content)).await
        {
            Ok(result) => result,
            Err(_) => Err(WaflowError::Timeout {
                duration: self.settings.send_timeout,
            }),
        }
    }

    async fn mark_read(
        &self,
        connection_id: ConnectionId,
        chat_id: &str,
        wire_message_ids: &[String],
    ) -> Result<(), WaflowError> {
        let client = match self.active.get(&connection_id) {
            Some(session) => session.client.clone(),
            None => {
                return Err(WaflowError::transport(format!(
                    "no live socket session for connection {connection_id}"
                )))
            }
        };
        client.mark_read(chat_id, wire_message_ids).await
    }

    async fn stop(
        &self,
        connection_id: ConnectionId,
        tenant_id: TenantId,
    ) -> Result<(), WaflowError> {
        let Some((_, session)) = self.active.remove(&connection_id) else {
            return Ok(());
        };
        session.pump.abort();
        if let Err(e) = session.client.logout().await {
            warn!(%connection_id, error = %e, "logout failed, disconnecting anyway");
            session.client.disconnect().await?;
        }
        wipe_credentials(&self.credentials_dir(connection_id)).await;
        let _ = self
            .events
            .send(TransportEvent::SessionClosed {
                connection_id,
                tenant_id,
                cause: CloseCause::Other("stopped".to_string()),
            })
            .await;
        debug_assert_eq!(tenant_id, session.tenant_id);
        Ok(())
    }
}

/// Render a pairing code as a scannable terminal QR block.
pub fn qr_terminal(code: &str) -> Option<String> {
    let qr = qrcode::QrCode::new(code.as_bytes()).ok()?;
    Some(
        qr.render::<qrcode::render::unicode::Dense1x2>()
            .quiet_zone(true)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use waflow_core::types::DeliveryStatus;

    use crate::wire::WireMessage;

    /// Scripted client: replays a fixed event sequence on every connect.
    struct ScriptedClient {
        script: Mutex<Vec<Vec<WireEvent>>>,
        connects: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(runs: Vec<Vec<WireEvent>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(runs),
                connects: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl WireClient for ScriptedClient {
        async fn connect(&self, events: mpsc::Sender<WireEvent>) -> Result<(), WaflowError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let run = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    Vec::new()
                } else {
                    script.remove(0)
                }
            };
            tokio::spawn(async move {
                for event in run {
                    let _ = events.send(event).await;
                }
            });
            Ok(())
        }

        async fn send(
            &self,
            _chat_id: &str,
            _content: &OutboundContent,
        ) -> Result<SendReceipt, WaflowError> {
            Ok(SendReceipt {
                wire_message_id: "WIRE-OUT".into(),
                status: DeliveryStatus::Sent,
                timestamp: 1_700_000_000,
            })
        }

        async fn mark_read(
            &self,
            _chat_id: &str,
            _message_ids: &[String],
        ) -> Result<(), WaflowError> {
            Ok(())
        }

        async fn logout(&self) -> Result<(), WaflowError> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), WaflowError> {
            Ok(())
        }
    }

    struct ScriptedFactory(Arc<ScriptedClient>);

    impl WireClientFactory for ScriptedFactory {
        fn create(&self, _connection_id: ConnectionId, _dir: &Path) -> Arc<dyn WireClient> {
            self.0.clone()
        }
    }

    fn transport(
        client: Arc<ScriptedClient>,
        dir: &Path,
        backoff_ms: u64,
    ) -> (SocketTransport, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let transport = SocketTransport::new(
            Arc::new(ScriptedFactory(client)),
            SocketSettings {
                sessions_dir: dir.to_path_buf(),
                reconnect_backoff: Duration::from_millis(backoff_ms),
                send_timeout: Duration::from_secs(1),
            },
            tx,
        );
        (transport, rx)
    }

    #[tokio::test]
    async fn pairing_flow_emits_qr_then_opened() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![vec![
            WireEvent::Qr { code: "2@abc".into() },
            WireEvent::Connected {
                phone_number: "5215550001".into(),
                display_name: Some("Shop".into()),
            },
        ]]);
        let (transport, mut rx) = transport(client, dir.path(), 5);

        transport.start(ConnectionId(1), TenantId(1)).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::QrChallenge { code, .. } if code == "2@abc"
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::SessionOpened { phone_number, .. } if phone_number == "5215550001"
        ));
        assert!(transport.is_active(ConnectionId(1)));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![vec![]]);
        let (transport, _rx) = transport(client.clone(), dir.path(), 5);

        transport.start(ConnectionId(1), TenantId(1)).await.unwrap();
        transport.start(ConnectionId(1), TenantId(1)).await.unwrap();
        assert_eq!(client.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn logout_wipes_credentials_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![vec![WireEvent::Disconnected {
            logged_out: true,
            reason: Some("device logout".into()),
        }]]);
        let (transport, mut rx) = transport(client.clone(), dir.path(), 5);

        transport.start(ConnectionId(1), TenantId(1)).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::SessionClosed {
                cause: CloseCause::LoggedOut,
                ..
            }
        ));
        // Give the pump a moment to finish its cleanup.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!dir.path().join("conn-1").exists());
        assert!(!transport.is_active(ConnectionId(1)));
        assert_eq!(client.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_close_reconnects_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![
            vec![WireEvent::Disconnected {
                logged_out: false,
                reason: Some("stream error".into()),
            }],
            vec![WireEvent::Disconnected {
                logged_out: false,
                reason: Some("stream error".into()),
            }],
        ]);
        let (transport, mut rx) = transport(client.clone(), dir.path(), 5);

        transport.start(ConnectionId(1), TenantId(1)).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::SessionClosed {
                cause: CloseCause::TransportLost,
                ..
            }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::SessionClosed {
                cause: CloseCause::TransportLost,
                ..
            }
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Initial connect plus the single retry, never a third.
        assert_eq!(client.connects.load(Ordering::SeqCst), 2);
        assert!(!transport.is_active(ConnectionId(1)));
    }

    #[tokio::test]
    async fn inbound_messages_are_normalized_and_own_echoes_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let inbound = WireMessage {
            id: "WIRE1".into(),
            chat_id: "5215550001@s.whatsapp.net".into(),
            sender_phone: "5215550001".into(),
            push_name: None,
            from_me: false,
            timestamp: 1_700_000_000,
            content: json!({"conversation": "hola"}),
        };
        let echo = WireMessage {
            from_me: true,
            ..inbound.clone()
        };
        let client = ScriptedClient::new(vec![vec![
            WireEvent::Message(echo),
            WireEvent::Message(inbound),
        ]]);
        let (transport, mut rx) = transport(client, dir.path(), 5);

        transport.start(ConnectionId(1), TenantId(1)).await.unwrap();
        match rx.recv().await.unwrap() {
            TransportEvent::MessageReceived { message, .. } => {
                assert_eq!(message.body, "hola");
                assert!(!message.from_me);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_without_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![]);
        let (transport, _rx) = transport(client, dir.path(), 5);
        let err = transport
            .send(
                ConnectionId(9),
                "5215550001",
                &OutboundContent::Text { body: "hi".into() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WaflowError::Transport { .. }));
    }

    #[test]
    fn qr_render_produces_block_art() {
        let art = qr_terminal("2@abcdef").unwrap();
        assert!(art.contains('█'));
    }
}
