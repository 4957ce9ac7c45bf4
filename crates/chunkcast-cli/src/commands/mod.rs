//! CLI command definitions and handlers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use chunkcast_core::config::Config;

/// Load configuration.
///
/// An explicit path must load cleanly. The default location falls back to
/// defaults when the file is missing or unreadable.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::load().unwrap_or_else(|e| {
            tracing::warn!("Using default configuration: {}", e);
            Config::default()
        })),
    }
}

pub mod config;
pub mod list;
pub mod receive;
pub mod share;

/// Chunkcast - share files over local broadcast datagrams
#[derive(Parser)]
#[command(name = "chunkcast")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Detailed logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Share files with receivers on the network
    Share(ShareArgs),

    /// List the files a sharer offers
    List(ListArgs),

    /// Receive shared files
    Receive(ReceiveArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the share command
#[derive(Parser)]
pub struct ShareArgs {
    /// Files to share
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Drop each outgoing frame with this probability (0.0 - 1.0)
    #[arg(long, value_name = "P", conflicts_with = "no_loss")]
    pub loss: Option<f64>,

    /// Disable loss simulation even if configured
    #[arg(long)]
    pub no_loss: bool,
}

/// Arguments for the list command
#[derive(Parser)]
pub struct ListArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the receive command
#[derive(Parser)]
pub struct ReceiveArgs {
    /// Identifiers of the files to receive
    #[arg(conflicts_with = "all")]
    pub ids: Vec<String>,

    /// Receive every listed file
    #[arg(short, long)]
    pub all: bool,

    /// Output directory for received files
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Do not re-request pieces of stalled transfers
    #[arg(long)]
    pub no_recovery: bool,

    /// Give up after this long (e.g., 30s, 5m)
    #[arg(short, long, default_value = "60s")]
    pub timeout: String,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show all configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Reset configuration to defaults
    Reset,
}
