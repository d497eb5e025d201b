// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cloud-api transport.
//!
//! There is no persistent session; a connection is "up" once its
//! credentials are registered. Outbound messages go over HTTPS to the
//! provider's messages endpoint, inbound traffic arrives as webhook
//! payloads that the gateway hands to [`CloudTransport::ingest_webhook`].

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{debug, warn};
use tokio::sync::mpsc;
use waflow_core::types::{
    CloseCause, CloudCredentials, DeliveryStatus, OutboundContent, SendReceipt, TransportEvent,
    TransportKind,
};
use waflow_core::{ConnectionId, TenantId, Transport, WaflowError};

use crate::normalize::{cloud_status, normalize_cloud};

#[derive(Debug, Clone)]
pub struct CloudSettings {
    pub base_url: String,
    pub send_timeout: Duration,
}

struct Registration {
    tenant_id: TenantId,
    credentials: CloudCredentials,
}

pub struct CloudTransport {
    http: reqwest::Client,
    settings: CloudSettings,
    events: mpsc::Sender<TransportEvent>,
    registered: DashMap<ConnectionId, Registration>,
}

impl CloudTransport {
    pub fn new(
        settings: CloudSettings,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, WaflowError> {
        let http = reqwest::Client::builder()
            .timeout(settings.send_timeout)
            .build()
            .map_err(|e| WaflowError::transport(format!("cannot build http client: {e}")))?;
        Ok(Self {
            http,
            settings,
            events,
            registered: DashMap::new(),
        })
    }

    /// Register credentials for a connection. Must happen before `start`.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        tenant_id: TenantId,
        credentials: CloudCredentials,
    ) {
        self.registered.insert(
            connection_id,
            Registration {
                tenant_id,
                credentials,
            },
        );
    }

    /// Resolve a webhook verify token to its connection.
    pub fn verify_token(&self, token: &str) -> Option<ConnectionId> {
        self.registered.iter().find_map(|entry| {
            (entry.credentials.webhook_verify_token.as_deref() == Some(token))
                .then(|| *entry.key())
        })
    }

    fn resolve_phone_number_id(&self, phone_number_id: &str) -> Option<(ConnectionId, TenantId)> {
        self.registered.iter().find_map(|entry| {
            (entry.credentials.phone_number_id == phone_number_id)
                .then(|| (*entry.key(), entry.tenant_id))
        })
    }

    fn messages_url(&self, phone_number_id: &str) -> String {
        format!(
            "{}/{phone_number_id}/messages",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    /// Process a webhook delivery. Each item is handled in isolation: one
    /// malformed message never blocks the rest of the batch, and the
    /// caller always answers 200 so the provider does not retry forever.
    pub async fn ingest_webhook(&self, payload: &Value) {
        let entries = payload
            .get("entry")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for entry in &entries {
            let changes = entry.get("changes").and_then(Value::as_array);
            for change in changes.into_iter().flatten() {
                let Some(value) = change.get("value") else {
                    continue;
                };
                self.ingest_change(value).await;
            }
        }
    }

    async fn ingest_change(&self, value: &Value) {
        let phone_number_id = value
            .get("metadata")
            .and_then(|m| m.get("phone_number_id"))
            .and_then(Value::as_str);
        let Some(phone_number_id) = phone_number_id else {
            warn!("webhook change without metadata.phone_number_id, skipping");
            return;
        };
        let Some((connection_id, tenant_id)) = self.resolve_phone_number_id(phone_number_id)
        else {
            warn!(phone_number_id, "webhook for unknown phone number id, skipping");
            return;
        };

        let profile_name = value
            .get("contacts")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("profile"))
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str);

        let messages = value.get("messages").and_then(Value::as_array);
        for message in messages.into_iter().flatten() {
            match normalize_cloud(message, profile_name) {
                Some(normalized) => {
                    let _ = self
                        .events
                        .send(TransportEvent::MessageReceived {
                            connection_id,
                            tenant_id,
                            sender_phone: normalized.sender_phone.clone(),
                            message: normalized,
                        })
                        .await;
                }
                None => {
                    warn!(%connection_id, "dropping malformed webhook message");
                }
            }
        }

        let statuses = value.get("statuses").and_then(Value::as_array);
        for status in statuses.into_iter().flatten() {
            let wire_message_id = status.get("id").and_then(Value::as_str);
            let mapped = status
                .get("status")
                .and_then(Value::as_str)
                .and_then(cloud_status);
            match (wire_message_id, mapped) {
                (Some(id), Some(delivery)) => {
                    let _ = self
                        .events
                        .send(TransportEvent::MessageStatus {
                            connection_id,
                            tenant_id,
                            wire_message_id: id.to_string(),
                            status: delivery,
                        })
                        .await;
                }
                _ => debug!(%connection_id, "ignoring unrecognized webhook status"),
            }
        }
    }

    async fn post_messages(
        &self,
        credentials: &CloudCredentials,
        payload: &Value,
    ) -> Result<Value, WaflowError> {
        let response = self
            .http
            .post(self.messages_url(&credentials.phone_number_id))
            .bearer_auth(&credentials.access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| WaflowError::transport(format!("cloud api request failed: {e}")))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let detail = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("no detail");
            return Err(WaflowError::transport(format!(
                "cloud api rejected message ({status}): {detail}"
            )));
        }
        Ok(body)
    }
}

/// Build the provider payload for one outbound message.
fn build_send_payload(recipient: &str, content: &OutboundContent) -> Value {
    let mut object = serde_json::Map::new();
    object.insert("messaging_product".into(), json!("whatsapp"));
    object.insert("to".into(), json!(recipient));
    match content {
        OutboundContent::Text { body } => {
            object.insert("type".into(), json!("text"));
            object.insert("text".into(), json!({"body": body}));
        }
        OutboundContent::Image { url, caption, .. } => {
            object.insert("type".into(), json!("image"));
            let mut media = json!({"link": url});
            if let Some(caption) = caption {
                media["caption"] = json!(caption);
            }
            object.insert("image".into(), media);
        }
        OutboundContent::Video { url, caption, .. } => {
            object.insert("type".into(), json!("video"));
            let mut media = json!({"link": url});
            if let Some(caption) = caption {
                media["caption"] = json!(caption);
            }
            object.insert("video".into(), media);
        }
        OutboundContent::Audio { url, .. } => {
            object.insert("type".into(), json!("audio"));
            object.insert("audio".into(), json!({"link": url}));
        }
        OutboundContent::Document {
            url,
            filename,
            caption,
            ..
        } => {
            object.insert("type".into(), json!("document"));
            let mut media = json!({"link": url});
            if let Some(filename) = filename {
                media["filename"] = json!(filename);
            }
            if let Some(caption) = caption {
                media["caption"] = json!(caption);
            }
            object.insert("document".into(), media);
        }
    }
    Value::Object(object)
}

#[async_trait]
impl Transport for CloudTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::CloudApi
    }

    async fn start(
        &self,
        connection_id: ConnectionId,
        tenant_id: TenantId,
    ) -> Result<(), WaflowError> {
        let phone_number_id = match self.registered.get(&connection_id) {
            Some(registration) => registration.credentials.phone_number_id.clone(),
            None => {
                return Err(WaflowError::Validation(format!(
                    "connection {connection_id} has no cloud credentials registered"
                )))
            }
        };
        let _ = self
            .events
            .send(TransportEvent::SessionOpened {
                connection_id,
                tenant_id,
                phone_number: phone_number_id,
                display_name: None,
            })
            .await;
        Ok(())
    }

    async fn send(
        &self,
        connection_id: ConnectionId,
        recipient: &str,
        content: &OutboundContent,
    ) -> Result<SendReceipt, WaflowError> {
        let credentials = match self.registered.get(&connection_id) {
            Some(registration) => registration.credentials.clone(),
            None => {
                return Err(WaflowError::transport(format!(
                    "connection {connection_id} has no cloud credentials registered"
                )))
            }
        };
        let payload = build_send_payload(recipient, content);
        let body = self.post_messages(&credentials, &payload).await?;
        let wire_message_id = body
            .get("messages")
            .and_then(|m| m.get(0))
            .and_then(|m| m.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                WaflowError::transport("cloud api response missing message id".to_string())
            })?
            .to_string();
        Ok(SendReceipt {
            wire_message_id,
            status: DeliveryStatus::Sent,
            timestamp: chrono::Utc::now().timestamp(),
        })
    }

    async fn mark_read(
        &self,
        connection_id: ConnectionId,
        _chat_id: &str,
        wire_message_ids: &[String],
    ) -> Result<(), WaflowError> {
        let credentials = match self.registered.get(&connection_id) {
            Some(registration) => registration.credentials.clone(),
            None => {
                return Err(WaflowError::transport(format!(
                    "connection {connection_id} has no cloud credentials registered"
                )))
            }
        };
        for id in wire_message_ids {
            let payload = json!({
                "messaging_product": "whatsapp",
                "status": "read",
                "message_id": id,
            });
            self.post_messages(&credentials, &payload).await?;
        }
        Ok(())
    }

    async fn stop(
        &self,
        connection_id: ConnectionId,
        tenant_id: TenantId,
    ) -> Result<(), WaflowError> {
        if self.registered.remove(&connection_id).is_some() {
            let _ = self
                .events
                .send(TransportEvent::SessionClosed {
                    connection_id,
                    tenant_id,
                    cause: CloseCause::Other("stopped".to_string()),
                })
                .await;
        }
        Ok(())
    }
}
