//! List command implementation.

use std::path::Path;

use anyhow::{Context, Result};

use chunkcast_core::receiver::ControlClient;

use super::ListArgs;
use crate::ui::print_listing;

/// Run the list command.
pub async fn run(args: ListArgs, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;

    let client = ControlClient::connect(&config.network)
        .await
        .context("Failed to open control socket")?;
    let files = client
        .list()
        .await
        .with_context(|| format!("No listing from {}", client.server()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&files)?);
    } else {
        print_listing(&files);
    }
    Ok(())
}
