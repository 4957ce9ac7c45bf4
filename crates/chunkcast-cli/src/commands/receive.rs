//! Receive command implementation.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};

use chunkcast_core::catalog::FileDescriptor;
use chunkcast_core::protocol::FileId;
use chunkcast_core::receiver::{Receiver, TransferStatus};

use super::ReceiveArgs;
use crate::ui::{parse_duration, print_banner, print_listing};

/// Run the receive command.
pub async fn run(args: ReceiveArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = super::load_config(config_path)?;

    if let Some(output) = args.output.clone() {
        config.transfer.downloads_dir = output;
    }
    if args.no_recovery {
        config.recovery.enabled = false;
    }
    let timeout = parse_duration(&args.timeout)
        .with_context(|| format!("Invalid timeout '{}'", args.timeout))?;

    let mut receiver = Receiver::bind(&config)
        .await
        .context("Failed to start receiver")?;
    let mut updates = receiver
        .take_status_updates()
        .context("Status updates already taken")?;

    let files = receiver
        .refresh_listing()
        .await
        .context("Failed to fetch listing")?;

    print_banner();
    print_listing(&files);
    println!();

    let wanted = select_files(&files, &args)?;
    if wanted.is_empty() {
        bail!("Nothing to receive. Pass file ids or --all.");
    }

    let names: HashMap<FileId, String> = files.iter().map(|f| (f.id, f.name.clone())).collect();
    for id in &wanted {
        receiver
            .request_file(id)
            .await
            .with_context(|| format!("Request for {} failed", id))?;
    }

    println!(
        "  Receiving {} file(s) into {}",
        wanted.len(),
        config.transfer.downloads_dir.display()
    );
    println!();

    let mut pending: HashSet<FileId> = wanted.into_iter().collect();
    let mut corrupted = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;

    while !pending.is_empty() {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                if !pending.contains(&update.file_id) {
                    continue;
                }
                let name = names.get(&update.file_id).map_or("?", String::as_str);
                println!("  {} {}: {}", update.file_id, name, update.status);

                match update.status {
                    TransferStatus::Downloaded { .. } => {
                        pending.remove(&update.file_id);
                    }
                    TransferStatus::Corrupted => {
                        pending.remove(&update.file_id);
                        corrupted.push(update.file_id);
                    }
                    _ => {}
                }
            }
            () = tokio::time::sleep_until(deadline) => {
                bail!("Timed out with {} file(s) unfinished", pending.len());
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                println!();
                println!("  Cancelled.");
                break;
            }
        }
    }

    receiver.shutdown().await;

    if !corrupted.is_empty() {
        bail!(
            "{} file(s) failed verification; list again and request them anew",
            corrupted.len()
        );
    }
    Ok(())
}

fn select_files(files: &[FileDescriptor], args: &ReceiveArgs) -> Result<Vec<FileId>> {
    if args.all {
        let mut seen = HashSet::new();
        return Ok(files
            .iter()
            .map(|f| f.id)
            .filter(|id| seen.insert(*id))
            .collect());
    }

    args.ids
        .iter()
        .map(|raw| {
            let id: FileId = raw
                .parse()
                .with_context(|| format!("Invalid file id '{}'", raw))?;
            if !files.iter().any(|f| f.id == id) {
                bail!("File {} is not in the listing", id);
            }
            Ok(id)
        })
        .collect()
}
