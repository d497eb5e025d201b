// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Waflow - a multi-tenant WhatsApp connection and routing engine.
//!
//! This is the binary entry point for the Waflow server.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::{Parser, Subcommand};

mod serve;
mod wire;

/// Waflow - a multi-tenant WhatsApp connection and routing engine.
#[derive(Parser, Debug)]
#[command(name = "waflow", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the Waflow engine and gateway.
    Serve,
    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match waflow_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            waflow_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Commands::Serve) => {
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("waflow serve failed: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::Config) => match toml_render(&config) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                eprintln!("cannot render config: {e}");
                std::process::exit(1);
            }
        },
        None => {
            println!("waflow: use --help for available commands");
        }
    }
}

fn toml_render(config: &waflow_config::WaflowConfig) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(config)
}

#[cfg(test)]
mod tests {
    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Verify jemalloc is the global allocator by advancing the epoch.
        // Only jemalloc supports this -- the system allocator would fail.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn binary_loads_config_defaults() {
        // Verify config loads with defaults (no config file needed)
        let config = waflow_config::load_and_validate()
            .expect("default config should be valid");
        assert_eq!(config.server.port, 8930);
    }

    #[test]
    fn config_renders_as_toml() {
        let config = waflow_config::WaflowConfig::default();
        let rendered = super::toml_render(&config).expect("default config serializes");
        assert!(rendered.contains("[server]"));
    }
}
