//! Chunkcast CLI - file sharing over local broadcast datagrams
//!
//! One machine shares files; any number of machines on the same network
//! segment list them and receive them from a single broadcast stream.
//!
//! ## Quick Start
//!
//! ```bash
//! # Share files
//! chunkcast share ./video.mp4 ./notes.txt
//!
//! # See what is shared (on another machine)
//! chunkcast list
//!
//! # Receive everything
//! chunkcast receive --all
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Command::Share(args) => commands::share::run(args, cli.config.as_deref()).await,
        Command::List(args) => commands::list::run(args, cli.config.as_deref()).await,
        Command::Receive(args) => commands::receive::run(args, cli.config.as_deref()).await,
        Command::Config(args) => commands::config::run(args, cli.config.as_deref()),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if verbose {
        "info,chunkcast=debug,chunkcast_core=debug"
    } else {
        "warn,chunkcast=info,chunkcast_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
