// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Diagnostic error types for configuration loading and validation.

use miette::Diagnostic;
use thiserror::Error;

/// A configuration error suitable for rendering to the operator at startup.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// The configuration failed to parse or deserialize.
    #[error("failed to load configuration: {message}")]
    #[diagnostic(code(waflow::config::load))]
    Load {
        /// Underlying figment/toml error text.
        message: String,
    },

    /// A semantic constraint on a configuration value was violated.
    #[error("{message}")]
    #[diagnostic(code(waflow::config::validation))]
    Validation {
        /// Description of the violated constraint, prefixed with the key path.
        message: String,
    },
}

/// Convert a figment error (which may aggregate several failures) into
/// individual [`ConfigError`]s.
pub fn figment_to_config_errors(err: figment::Error) -> Vec<ConfigError> {
    err.into_iter()
        .map(|e| ConfigError::Load {
            message: e.to_string(),
        })
        .collect()
}

/// Render collected configuration errors to stderr via miette's fancy
/// reporter.
pub fn render_errors(errors: &[ConfigError]) {
    for err in errors {
        eprintln!("{:?}", miette::Report::msg(err.to_string()));
    }
    eprintln!(
        "waflow: {} configuration error{} -- fix waflow.toml and retry",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" }
    );
}
