//! Dropgate terminal client.
//!
//! `dropgate send` and `dropgate receive` move files between two peers
//! over a WebSocket channel; one side dials (`--to`/`--from`), the other
//! listens (`--listen`). Multiple send paths are bundled into a single
//! streamed ZIP.

mod config;
mod progress;
mod transfer;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "dropgate")]
#[command(about = concat!("Dropgate v", env!("CARGO_PKG_VERSION"), " — peer-to-peer file transfer"))]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Suppress the progress bar
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one or more files to a peer
    Send {
        /// Files to send; more than one is bundled into a ZIP stream
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Peer URL to dial, e.g. ws://192.168.1.20:7350
        #[arg(long, conflicts_with = "listen")]
        to: Option<String>,

        /// Address to listen on until the receiving peer dials us
        #[arg(long)]
        listen: Option<String>,

        /// Chunk size in bytes
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Receive a file from a peer
    Receive {
        /// Peer URL to dial, e.g. ws://192.168.1.20:7350
        #[arg(long, conflicts_with = "listen")]
        from: Option<String>,

        /// Address to listen on until the sending peer dials us
        #[arg(long)]
        listen: Option<String>,

        /// Output directory (defaults to the working directory)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Continue a partial download at this path
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Keep a running SHA-256 of the delivered bytes and print it
        #[arg(long)]
        verify: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "debug,dropgate_core=trace"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Send {
            paths,
            to,
            listen,
            chunk_size,
        } => transfer::send(paths, to, listen, chunk_size, cli.quiet, &config).await,
        Commands::Receive {
            from,
            listen,
            out,
            resume,
            verify,
        } => transfer::receive(from, listen, out, resume, verify, cli.quiet, &config).await,
    }
}
