// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Waflow messaging engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup.

use serde::{Deserialize, Serialize};

/// Top-level Waflow configuration.
///
/// Loaded from TOML files with environment variable overrides. All sections
/// are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WaflowConfig {
    /// Gateway HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// SQLite storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Socket transport settings.
    #[serde(default)]
    pub socket: SocketConfig,

    /// Cloud API transport settings.
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

/// Gateway HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token guarding the send API. `None` disables those routes;
    /// webhook and health routes are always public.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bearer_token: None,
        }
    }
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Socket transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SocketConfig {
    /// Directory holding per-(tenant, connection) credential material.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,

    /// Fixed delay before the single reconnect attempt after a transient
    /// involuntary close. Deliberately configurable, not a business rule.
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,

    /// Bound on outbound wire sends; on expiry the message is marked failed.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

/// Cloud API transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CloudConfig {
    /// Graph API base URL. Overridable for tests.
    #[serde(default = "default_cloud_base_url")]
    pub base_url: String,

    /// Bound on outbound API calls.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: default_cloud_base_url(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8930
}

fn default_database_path() -> String {
    "waflow.db".to_string()
}

fn default_sessions_dir() -> String {
    "sessions".to_string()
}

fn default_reconnect_backoff_secs() -> u64 {
    3
}

fn default_send_timeout_secs() -> u64 {
    15
}

fn default_cloud_base_url() -> String {
    "https://graph.facebook.com/v18.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
