// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tether - session bridge between external messaging platforms and
//! local-first clients.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod status;

use clap::{Parser, Subcommand};
use tether_config::TetherConfig;

/// Tether - session bridge for local-first messaging clients.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway, session manager, and outbox worker.
    Serve,
    /// Show persisted sessions from the database.
    Status {
        /// Only show the latest session of this account.
        #[arg(long)]
        account: Option<String>,
        /// Output structured JSON.
        #[arg(long)]
        json: bool,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML (tokens redacted).
    Show,
    /// Load and validate configuration, then exit.
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match tether_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            tether_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Status { account, json }) => {
            status::run_status(&config, account.as_deref(), json).await
        }
        Some(Commands::Config { action }) => {
            match action {
                ConfigAction::Show => match render_config(&config) {
                    Ok(rendered) => print!("{rendered}"),
                    Err(e) => {
                        eprintln!("error: {e}");
                        std::process::exit(1);
                    }
                },
                ConfigAction::Validate => eprintln!("tether: configuration is valid"),
            }
            Ok(())
        }
        None => {
            println!("tether: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Effective configuration as TOML with gateway tokens masked.
fn render_config(config: &TetherConfig) -> Result<String, toml::ser::Error> {
    let mut redacted = config.clone();
    redacted.gateway.tokens = redacted
        .gateway
        .tokens
        .into_values()
        .enumerate()
        .map(|(i, account)| (format!("token-{}", i + 1), account))
        .collect();
    toml::to_string_pretty(&redacted)
}
