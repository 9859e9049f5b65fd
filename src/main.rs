// SPDX-License-Identifier: GPL-3.0-only

use camera_core::capture::Facing;
use camera_core::permissions::Capability;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-core")]
#[command(about = "Take photos with permission, storage and notification handling")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/camera-core/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take a photo and save it to the library
    Capture {
        /// Lens to use: front or back (default from config)
        #[arg(short, long)]
        facing: Option<Facing>,
    },

    /// Show the status of every permission
    Permissions,

    /// Ask again for a denied permission
    Retry {
        /// capture, storage or notifications
        capability: Capability,
    },

    /// Send a notification
    Notify {
        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        body: String,

        /// Deliver after this many seconds
        #[arg(short, long)]
        delay: Option<u64>,
    },

    /// Register for push notifications
    Push,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_core=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Capture { facing } => cli::capture(cli.config, facing).await,
        Commands::Permissions => cli::permissions(cli.config).await,
        Commands::Retry { capability } => cli::retry(cli.config, capability).await,
        Commands::Notify { title, body, delay } => {
            cli::notify(cli.config, title, body, delay).await
        }
        Commands::Push => cli::push(cli.config).await,
    }
}
