// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live session registry.
//!
//! Maps (tenant, connection) to the transport driving it, so the router
//! and gateway can dispatch sends without caring which variant is behind
//! a connection.

use std::sync::Arc;

use dashmap::DashMap;
use waflow_core::types::TransportKind;
use waflow_core::{ConnectionId, TenantId, Transport};

#[derive(Clone)]
pub struct SessionHandle {
    pub tenant_id: TenantId,
    pub kind: TransportKind,
    pub transport: Arc<dyn Transport>,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<(TenantId, ConnectionId), SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, replacing any previous handle for the key.
    pub fn register(
        &self,
        tenant_id: TenantId,
        connection_id: ConnectionId,
        transport: Arc<dyn Transport>,
    ) {
        let handle = SessionHandle {
            tenant_id,
            kind: transport.kind(),
            transport,
        };
        self.sessions.insert((tenant_id, connection_id), handle);
    }

    pub fn get(&self, tenant_id: TenantId, connection_id: ConnectionId) -> Option<SessionHandle> {
        self.sessions
            .get(&(tenant_id, connection_id))
            .map(|entry| entry.clone())
    }

    /// Look a session up by connection alone, for callers that carry no
    /// tenant context. Connection ids are globally unique so at most one
    /// entry matches.
    pub fn find(&self, connection_id: ConnectionId) -> Option<SessionHandle> {
        self.sessions.iter().find_map(|entry| {
            (entry.key().1 == connection_id).then(|| entry.value().clone())
        })
    }

    pub fn remove(&self, tenant_id: TenantId, connection_id: ConnectionId) -> Option<SessionHandle> {
        self.sessions
            .remove(&(tenant_id, connection_id))
            .map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use waflow_core::types::{OutboundContent, SendReceipt};
    use waflow_core::WaflowError;

    struct NullTransport(TransportKind);

    #[async_trait]
    impl Transport for NullTransport {
        fn kind(&self) -> TransportKind {
            self.0
        }

        async fn start(&self, _: ConnectionId, _: TenantId) -> Result<(), WaflowError> {
            Ok(())
        }

        async fn send(
            &self,
            _: ConnectionId,
            _: &str,
            _: &OutboundContent,
        ) -> Result<SendReceipt, WaflowError> {
            Err(WaflowError::transport("null transport".to_string()))
        }

        async fn mark_read(
            &self,
            _: ConnectionId,
            _: &str,
            _: &[String],
        ) -> Result<(), WaflowError> {
            Ok(())
        }

        async fn stop(&self, _: ConnectionId, _: TenantId) -> Result<(), WaflowError> {
            Ok(())
        }
    }

    #[test]
    fn register_get_and_remove() {
        let registry = SessionRegistry::new();
        registry.register(
            TenantId(1),
            ConnectionId(10),
            Arc::new(NullTransport(TransportKind::Socket)),
        );

        let handle = registry.get(TenantId(1), ConnectionId(10)).unwrap();
        assert_eq!(handle.kind, TransportKind::Socket);
        assert!(registry.get(TenantId(2), ConnectionId(10)).is_none());

        let found = registry.find(ConnectionId(10)).unwrap();
        assert_eq!(found.tenant_id, TenantId(1));

        registry.remove(TenantId(1), ConnectionId(10));
        assert!(registry.is_empty());
    }

    #[test]
    fn reregister_replaces_handle() {
        let registry = SessionRegistry::new();
        registry.register(
            TenantId(1),
            ConnectionId(10),
            Arc::new(NullTransport(TransportKind::Socket)),
        );
        registry.register(
            TenantId(1),
            ConnectionId(10),
            Arc::new(NullTransport(TransportKind::CloudApi)),
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(TenantId(1), ConnectionId(10)).unwrap().kind,
            TransportKind::CloudApi
        );
    }
}
