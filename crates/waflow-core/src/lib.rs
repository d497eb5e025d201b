// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Waflow messaging engine.
//!
//! Provides the error taxonomy, canonical message/event types, and the
//! transport adapter trait implemented by the socket and cloud-api variants.

pub mod error;
pub mod traits;
pub mod types;

pub use error::WaflowError;
pub use traits::Transport;
pub use types::{
    AgentId, CloseCause, ConnectionId, ConnectionStatus, ContactId, ContactStatus,
    DeliveryStatus, Direction, MessageKind, NormalizedMessage, OutboundContent, SendReceipt,
    TenantId, TicketId, TicketPriority, TicketStatus, TransportEvent, TransportKind,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_variants_construct() {
        let _config = WaflowError::Config("bad".into());
        let _storage = WaflowError::Storage {
            source: Box::new(std::io::Error::other("io")),
        };
        let _transport = WaflowError::transport("no live session");
        let _not_found = WaflowError::NotFound {
            entity: "connection",
            id: "7".into(),
        };
        let _conflict = WaflowError::Conflict("duplicate phone".into());
        let _validation = WaflowError::Validation("bad payload".into());
        let _timeout = WaflowError::Timeout {
            duration: std::time::Duration::from_secs(15),
        };
        let _internal = WaflowError::Internal("unexpected".into());
    }

    #[test]
    fn not_found_message_names_entity() {
        let err = WaflowError::NotFound {
            entity: "ticket",
            id: "42".into(),
        };
        assert_eq!(err.to_string(), "ticket not found: 42");
    }

    #[test]
    fn transport_error_carries_remote_detail() {
        let err = WaflowError::transport("(#131030) Recipient phone number not in allowed list");
        assert!(err.to_string().contains("131030"));
    }
}
