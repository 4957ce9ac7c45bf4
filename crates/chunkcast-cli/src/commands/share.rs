//! Share command implementation.

use std::path::Path;

use anyhow::{Context, Result};

use chunkcast_core::config::LossConfig;
use chunkcast_core::sharer::Sharer;

use super::ShareArgs;
use crate::ui::{print_banner, print_listing};

/// Run the share command.
pub async fn run(args: ShareArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = super::load_config(config_path)?;

    if args.no_loss {
        config.loss = LossConfig::disabled();
    } else if let Some(probability) = args.loss {
        config.loss = LossConfig::with_probability(probability);
    }

    let sharer = Sharer::bind(&config)
        .await
        .context("Failed to start sharing")?;

    for path in &args.paths {
        sharer
            .register(path)
            .await
            .with_context(|| format!("Cannot share {}", path.display()))?;
    }

    print_banner();
    print_listing(&sharer.files().await);
    println!();
    println!(
        "  Listening for requests on port {}, broadcasting to {}:{}",
        config.network.control_port, config.network.broadcast_address, config.network.data_port
    );
    if config.loss.simulate {
        println!(
            "  Simulating loss: dropping {:.1}% of frames",
            config.loss.probability * 100.0
        );
    }
    println!("  Press Ctrl+C to stop.");
    println!();

    let handle = sharer.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("  Stopping.");
    handle.shutdown().await;
    Ok(())
}
