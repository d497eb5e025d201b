// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes. Collects every violation instead of failing fast.

use crate::diagnostic::ConfigError;
use crate::model::WaflowConfig;

/// Validate a deserialized configuration for semantic correctness.
pub fn validate_config(config: &WaflowConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let host = config.server.host.trim();
    if host.is_empty() {
        errors.push(ConfigError::Validation {
            message: "server.host must not be empty".to_string(),
        });
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_valid_ip && !is_valid_hostname {
            errors.push(ConfigError::Validation {
                message: format!("server.host `{host}` is not a valid IP address or hostname"),
            });
        }
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.socket.sessions_dir.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "socket.sessions_dir must not be empty".to_string(),
        });
    }

    if config.socket.send_timeout_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "socket.send_timeout_secs must be at least 1".to_string(),
        });
    }

    if config.cloud.send_timeout_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "cloud.send_timeout_secs must be at least 1".to_string(),
        });
    }

    if !config.cloud.base_url.starts_with("http://") && !config.cloud.base_url.starts_with("https://")
    {
        errors.push(ConfigError::Validation {
            message: format!(
                "cloud.base_url must be an http(s) URL, got `{}`",
                config.cloud.base_url
            ),
        });
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.log.level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "log.level must be one of trace, debug, info, warn, error; got `{}`",
                config.log.level
            ),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
