// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports `./waflow.toml` > `~/.config/waflow/waflow.toml` >
//! `/etc/waflow/waflow.toml` with environment variable overrides via the
//! `WAFLOW_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::WaflowConfig;

/// Load configuration from the standard hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/waflow/waflow.toml` (system-wide)
/// 3. `~/.config/waflow/waflow.toml` (user XDG config)
/// 4. `./waflow.toml` (local directory)
/// 5. `WAFLOW_*` environment variables
pub fn load_config() -> Result<WaflowConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WaflowConfig::default()))
        .merge(Toml::file("/etc/waflow/waflow.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("waflow/waflow.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("waflow.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no file lookup).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<WaflowConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WaflowConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<WaflowConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WaflowConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Environment variable provider: `WAFLOW_SERVER__PORT=9000` maps to
/// `server.port`.
fn env_provider() -> Env {
    Env::prefixed("WAFLOW_").split("__")
}
