// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Socket protocol driver selection.
//!
//! Waflow does not bundle a WhatsApp socket protocol implementation; a
//! deployment links one by swapping the factory constructed in
//! [`default_wire_factory`]. The default build answers every socket
//! session start with a clear transport error while the cloud transport
//! stays fully functional.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use waflow_core::types::{OutboundContent, SendReceipt};
use waflow_core::{ConnectionId, WaflowError};
use waflow_transport::{WireClient, WireClientFactory, WireEvent};

/// Factory used when no protocol driver is linked in.
pub struct UnlinkedWireFactory;

struct UnlinkedWireClient;

fn unlinked() -> WaflowError {
    WaflowError::transport("no socket protocol driver is linked into this build")
}

#[async_trait]
impl WireClient for UnlinkedWireClient {
    async fn connect(&self, _events: mpsc::Sender<WireEvent>) -> Result<(), WaflowError> {
        Err(unlinked())
    }

    async fn send(
        &self,
        _chat_id: &str,
        _content: &OutboundContent,
    ) -> Result<SendReceipt, WaflowError> {
        Err(unlinked())
    }

    async fn mark_read(&self, _chat_id: &str, _message_ids: &[String]) -> Result<(), WaflowError> {
        Err(unlinked())
    }

    async fn logout(&self) -> Result<(), WaflowError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), WaflowError> {
        Ok(())
    }
}

impl WireClientFactory for UnlinkedWireFactory {
    fn create(&self, _connection_id: ConnectionId, _credentials_dir: &Path) -> Arc<dyn WireClient> {
        Arc::new(UnlinkedWireClient)
    }
}

/// The wire factory compiled into this binary.
pub fn default_wire_factory() -> Arc<dyn WireClientFactory> {
    Arc::new(UnlinkedWireFactory)
}
