#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use gramlens::{bot, Config};

/// `gramlens` - Instagram link previews for Discord, kept in sync.
#[derive(Parser, Debug)]
#[command(name = "gramlens")]
#[command(version)]
#[command(about = "Discord bot that previews Instagram links and tracks edits.", long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the Discord gateway and start previewing links
    Run,
    /// Check configuration and credentials without starting the bot
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install default crypto provider for Rustls TLS. Both reqwest and
    // tokio-tungstenite link rustls; without an explicit pick the process-level
    // CryptoProvider cannot be determined automatically.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    // Missing credentials abort here, before anything touches the network.
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => bot::run(config).await,
        Commands::Doctor => bot::doctor(config).await,
    }
}
