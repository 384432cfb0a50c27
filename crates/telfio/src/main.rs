// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Telfio - a real-time telephony voice agent.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod doctor;
mod serve;
mod status;

/// Telfio - a real-time telephony voice agent.
#[derive(Parser, Debug)]
#[command(name = "telfio", version, about, long_about = None)]
struct Cli {
    /// Path to a telfio.toml (otherwise the XDG hierarchy is searched).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the voice agent: gateway, runners, and dispatcher.
    Serve,
    /// Query a running instance for its health and active calls.
    Status {
        /// Base URL of the running gateway.
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        url: String,
    },
    /// Check configuration, storage, and provider credentials.
    Doctor,
}

fn load_config(path: Option<&PathBuf>) -> telfio_config::TelfioConfig {
    let result = match path {
        Some(path) => telfio_config::load_config_from_path(path),
        None => telfio_config::load_config(),
    };
    match result {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: invalid configuration: {e}");
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit = match cli.command {
        Commands::Serve => {
            let config = load_config(cli.config.as_ref());
            match serve::run_serve(config).await {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("error: {e}");
                    1
                }
            }
        }
        Commands::Status { url } => status::run_status(&url).await,
        Commands::Doctor => {
            let config = load_config(cli.config.as_ref());
            doctor::run_doctor(config).await
        }
    };
    std::process::exit(exit);
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
}
