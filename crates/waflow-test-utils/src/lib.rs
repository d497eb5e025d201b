// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared test helpers: a scriptable transport and database fixtures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use waflow_core::types::{DeliveryStatus, OutboundContent, SendReceipt, TransportKind};
use waflow_core::{AgentId, ConnectionId, TenantId, Transport, WaflowError};
use waflow_storage::queries::{agents, connections, contacts, departments};
use waflow_storage::Database;

/// A transport that records what was sent and can be told to fail.
pub struct MockTransport {
    kind: TransportKind,
    counter: AtomicU64,
    pub sent: Mutex<Vec<(ConnectionId, String, OutboundContent)>>,
    pub read_acks: Mutex<Vec<(ConnectionId, String, Vec<String>)>>,
    fail_with: Mutex<Option<String>>,
}

impl MockTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            counter: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
            read_acks: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
        }
    }

    /// Make every subsequent send fail with this message.
    pub fn fail_sends(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn start(&self, _: ConnectionId, _: TenantId) -> Result<(), WaflowError> {
        Ok(())
    }

    async fn send(
        &self,
        connection_id: ConnectionId,
        recipient: &str,
        content: &OutboundContent,
    ) -> Result<SendReceipt, WaflowError> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(WaflowError::transport(message));
        }
        self.sent
            .lock()
            .unwrap()
            .push((connection_id, recipient.to_string(), content.clone()));
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SendReceipt {
            wire_message_id: format!("MOCK-{n}"),
            status: DeliveryStatus::Sent,
            timestamp: 1_700_000_000,
        })
    }

    async fn mark_read(
        &self,
        connection_id: ConnectionId,
        chat_id: &str,
        wire_message_ids: &[String],
    ) -> Result<(), WaflowError> {
        self.read_acks.lock().unwrap().push((
            connection_id,
            chat_id.to_string(),
            wire_message_ids.to_vec(),
        ));
        Ok(())
    }

    async fn stop(&self, _: ConnectionId, _: TenantId) -> Result<(), WaflowError> {
        Ok(())
    }
}

/// Seed a connection and return its id.
pub async fn seed_connection(db: &Database, tenant_id: TenantId, kind: TransportKind) -> ConnectionId {
    connections::create_connection(db, tenant_id, "test line", kind)
        .await
        .expect("seed connection")
}

pub async fn seed_agent(db: &Database, tenant_id: TenantId, name: &str) -> AgentId {
    agents::create_agent(db, tenant_id, name).await.expect("seed agent")
}

pub async fn seed_default_department(db: &Database, tenant_id: TenantId, name: &str) -> i64 {
    departments::create_department(db, tenant_id, name, true)
        .await
        .expect("seed department")
}

pub async fn seed_contact(db: &Database, tenant_id: TenantId, phone: &str) -> waflow_storage::ContactRow {
    contacts::find_or_create(db, tenant_id, phone, None)
        .await
        .expect("seed contact")
}
