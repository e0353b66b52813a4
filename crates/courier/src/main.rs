// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Courier - operator CLI for the outgoing-message delivery pipeline.
//!
//! Validates configuration, prepares the database and inspects the
//! persistent state the pipeline keeps between runs.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod inspect;

use clap::{Parser, Subcommand};

/// Courier - outgoing-message delivery pipeline.
#[derive(Parser, Debug)]
#[command(name = "courier", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and print the effective send settings.
    Check,
    /// Create or upgrade the database schema.
    Migrate,
    /// Show cached group-send tokens.
    Tokens {
        /// Group to inspect. Lists cached groups when omitted.
        group: Option<String>,
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Count retry placeholders still waiting for a resent message.
    Placeholders,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match courier_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            courier_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging.level);

    let result = match cli.command {
        Commands::Check => {
            print!("{}", inspect::settings_summary(&config));
            Ok(())
        }
        Commands::Migrate => inspect::run_migrate(&config).await,
        Commands::Tokens { group, json } => {
            inspect::run_tokens(&config, group.as_deref(), json).await
        }
        Commands::Placeholders => inspect::run_placeholders(&config).await,
    };

    if let Err(e) = result {
        eprintln!("courier: {e}");
        std::process::exit(1);
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("courier={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}
