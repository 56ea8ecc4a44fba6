// SPDX-FileCopyrightText: 2026 Opencode-Mem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! opencode-mem - persistent per-project memory for an AI coding assistant.
//!
//! This is the binary entry point for the memory service.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::{Parser, Subcommand};

mod serve;
mod status;

/// opencode-mem - persistent per-project memory service.
#[derive(Parser, Debug)]
#[command(name = "ocmem", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the memory service.
    Serve {
        /// Explicit config file (JSONC). Defaults to the user config path.
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
    /// Probe a running service and print health and stats.
    Status {
        /// Port the service listens on.
        #[arg(long, default_value_t = 4747)]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { config } => serve::run_serve(config).await,
        Commands::Status { port } => status::run_status(port).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
