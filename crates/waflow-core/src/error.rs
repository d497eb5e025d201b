// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Waflow messaging engine.

use thiserror::Error;

/// The primary error type used across Waflow crates.
#[derive(Debug, Error)]
pub enum WaflowError {
    /// Configuration errors (invalid TOML, missing required fields).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Transport/session failures (no live session, remote API rejection).
    /// `message` carries the remote error detail when the transport supplies one.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A referenced entity (connection, contact, ticket) does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness violation, e.g. duplicate contact phone within a tenant.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed inbound payload. Normalizers degrade rather than raise this;
    /// it surfaces only on explicit API input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WaflowError {
    /// Shorthand for a transport error without an underlying source.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }
}
