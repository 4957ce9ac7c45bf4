//! Transfer manager.
//!
//! Owns one transfer task per listed file and routes incoming data frames
//! to them by identifier. Frames are handed over without waiting, so a busy
//! transfer only ever loses its own frames and never delays another.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::{mpsc, watch};

use super::recovery::RecoveryScheduler;
use super::transfer::{
    spawn_transfer, RecoveryRequest, StatusUpdate, Transfer, TransferCommand, TransferHandle,
    TransferProgress, TransferSnapshot, TransferState,
};
use crate::catalog::FileDescriptor;
use crate::config::RecoveryConfig;
use crate::error::{Error, Result};
use crate::protocol::{DataFrame, FileId};

/// Maps file identifiers to running transfers.
#[derive(Debug)]
pub struct TransferManager {
    files: Vec<FileDescriptor>,
    transfers: HashMap<FileId, TransferHandle>,
    chunk_size: usize,
    downloads_dir: PathBuf,
    recovery: RecoveryConfig,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
    parts_tx: mpsc::UnboundedSender<RecoveryRequest>,
}

impl TransferManager {
    /// Create a manager with no listed files.
    #[must_use]
    pub fn new(
        chunk_size: usize,
        downloads_dir: PathBuf,
        recovery: RecoveryConfig,
        status_tx: mpsc::UnboundedSender<StatusUpdate>,
        parts_tx: mpsc::UnboundedSender<RecoveryRequest>,
    ) -> Self {
        Self {
            files: Vec::new(),
            transfers: HashMap::new(),
            chunk_size,
            downloads_dir,
            recovery,
            status_tx,
            parts_tx,
        }
    }

    /// Replace every transfer with fresh idle ones for `files`.
    ///
    /// In-flight transfers are abandoned: their tasks are aborted when their
    /// handles are dropped here. Of several files sharing an identifier only
    /// the first gets a transfer. Files with unsafe names or a piece count
    /// that does not match the local chunk size get none.
    pub fn replace_listing(&mut self, files: Vec<FileDescriptor>) {
        self.transfers.clear();

        for descriptor in &files {
            if self.transfers.contains_key(&descriptor.id) {
                tracing::warn!(
                    "Ignoring {} in listing: identifier {} already taken",
                    descriptor.name,
                    descriptor.id
                );
                continue;
            }

            match Transfer::new(
                descriptor.clone(),
                self.chunk_size,
                &self.downloads_dir,
                self.status_tx.clone(),
            ) {
                Ok(transfer) => {
                    let handle = spawn_transfer(
                        transfer,
                        RecoveryScheduler::new(self.recovery.clone()),
                        self.parts_tx.clone(),
                    );
                    self.transfers.insert(descriptor.id, handle);
                }
                Err(e) => tracing::warn!("Skipping listed file {}: {}", descriptor.id, e),
            }
        }

        tracing::debug!("Listing replaced: {} transfers", self.transfers.len());
        self.files = files;
    }

    /// Hand a frame to its transfer. Unknown identifiers are dropped.
    pub fn route_frame(&self, frame: DataFrame) {
        let Some(handle) = self.transfers.get(&frame.id) else {
            tracing::trace!("Dropping frame for unknown file {}", frame.id);
            return;
        };

        let index = frame.index;
        if !handle.try_send(TransferCommand::Frame {
            index,
            payload: frame.payload,
        }) {
            tracing::trace!("Transfer {} busy, dropping piece {}", frame.id, index);
        }
    }

    /// Tell a transfer that the user requested it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFile`] if `id` is not in the listing.
    pub fn notify_requested(&self, id: &FileId) -> Result<()> {
        self.send(id, TransferCommand::Requested)
    }

    /// Ask a transfer to request all of its missing pieces again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFile`] if `id` is not in the listing.
    pub fn request_missing(&self, id: &FileId) -> Result<()> {
        self.send(id, TransferCommand::RequestMissing)
    }

    fn send(&self, id: &FileId, command: TransferCommand) -> Result<()> {
        let handle = self
            .transfers
            .get(id)
            .ok_or_else(|| Error::UnknownFile(id.to_string()))?;
        if handle.try_send(command) {
            Ok(())
        } else {
            Err(Error::Internal(format!("transfer {id} is not accepting commands")))
        }
    }

    /// Files of the current listing.
    #[must_use]
    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    /// Latest snapshot of a transfer.
    #[must_use]
    pub fn snapshot(&self, id: &FileId) -> Option<TransferSnapshot> {
        self.transfers.get(id).map(TransferHandle::snapshot)
    }

    /// Current state of a transfer.
    #[must_use]
    pub fn state(&self, id: &FileId) -> Option<TransferState> {
        self.snapshot(id).map(|s| s.state)
    }

    /// Current progress of a transfer.
    #[must_use]
    pub fn progress(&self, id: &FileId) -> Option<TransferProgress> {
        self.snapshot(id).map(|s| s.progress)
    }

    /// Subscribe to a transfer's snapshots.
    #[must_use]
    pub fn watch(&self, id: &FileId) -> Option<watch::Receiver<TransferSnapshot>> {
        self.transfers.get(id).map(TransferHandle::watch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::checksum_bytes;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        manager: TransferManager,
        _status_rx: mpsc::UnboundedReceiver<StatusUpdate>,
        _parts_rx: mpsc::UnboundedReceiver<RecoveryRequest>,
        dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (parts_tx, parts_rx) = mpsc::unbounded_channel();
        let manager = TransferManager::new(
            1000,
            dir.path().to_path_buf(),
            RecoveryConfig::default(),
            status_tx,
            parts_tx,
        );
        Fixture {
            manager,
            _status_rx: status_rx,
            _parts_rx: parts_rx,
            dir,
        }
    }

    fn descriptor(name: &str, data: &[u8]) -> FileDescriptor {
        let sum = checksum_bytes(data);
        FileDescriptor {
            id: FileId::from_checksum(&sum).unwrap(),
            name: name.into(),
            size: data.len() as u64,
            parts: crate::file::part_count(data.len() as u64, 1000),
            sum,
        }
    }

    #[tokio::test]
    async fn test_routes_frames_to_owner() {
        let mut fx = fixture();
        let data = vec![5u8; 800];
        let file = descriptor("one.bin", &data);
        let other = descriptor("two.bin", b"other");
        fx.manager.replace_listing(vec![file.clone(), other.clone()]);

        let mut watch = fx.manager.watch(&file.id).unwrap();
        fx.manager.route_frame(DataFrame {
            id: file.id,
            index: 0,
            payload: data.clone(),
        });

        tokio::time::timeout(
            Duration::from_secs(2),
            watch.wait_for(|s| s.state == TransferState::Complete),
        )
        .await
        .expect("completes")
        .unwrap();
        assert_eq!(fx.manager.state(&other.id), Some(TransferState::Idle));
        assert_eq!(std::fs::read(fx.dir.path().join("one.bin")).unwrap(), data);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_dropped() {
        let mut fx = fixture();
        fx.manager.replace_listing(vec![descriptor("a", b"a")]);

        let stranger: FileId = "ffffffff".parse().unwrap();
        fx.manager.route_frame(DataFrame {
            id: stranger,
            index: 0,
            payload: vec![1],
        });

        assert!(fx.manager.state(&stranger).is_none());
        assert!(matches!(
            fx.manager.request_missing(&stranger),
            Err(Error::UnknownFile(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_replaces_transfers() {
        let mut fx = fixture();
        let data = vec![1u8; 2500];
        let file = descriptor("big.bin", &data);
        fx.manager.replace_listing(vec![file.clone()]);

        let mut watch = fx.manager.watch(&file.id).unwrap();
        fx.manager.route_frame(DataFrame {
            id: file.id,
            index: 0,
            payload: data[..1000].to_vec(),
        });
        tokio::time::timeout(
            Duration::from_secs(2),
            watch.wait_for(|s| s.state == TransferState::Receiving),
        )
        .await
        .expect("starts")
        .unwrap();

        fx.manager.replace_listing(vec![file.clone()]);

        assert_eq!(fx.manager.state(&file.id), Some(TransferState::Idle));
        assert_eq!(
            fx.manager.progress(&file.id),
            Some(TransferProgress {
                received: 0,
                parts: 3
            })
        );
        assert_eq!(fx.manager.files().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_discards_frames_queued_for_old_transfer() {
        let mut fx = fixture();
        let data = vec![9u8; 1500];
        let file = descriptor("queued.bin", &data);
        fx.manager.replace_listing(vec![file.clone()]);

        // Queued without yielding, so the old task has not run yet
        fx.manager.route_frame(DataFrame {
            id: file.id,
            index: 0,
            payload: data[..1000].to_vec(),
        });
        fx.manager.route_frame(DataFrame {
            id: file.id,
            index: 1,
            payload: data[1000..].to_vec(),
        });
        fx.manager.replace_listing(vec![file.clone()]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!fx.dir.path().join("queued.bin").exists());
        assert!(!fx.dir.path().join("queued.bin.tmp").exists());
        assert_eq!(fx.manager.state(&file.id), Some(TransferState::Idle));

        let mut watch = fx.manager.watch(&file.id).unwrap();
        fx.manager.route_frame(DataFrame {
            id: file.id,
            index: 1,
            payload: data[1000..].to_vec(),
        });
        fx.manager.route_frame(DataFrame {
            id: file.id,
            index: 0,
            payload: data[..1000].to_vec(),
        });
        tokio::time::timeout(
            Duration::from_secs(2),
            watch.wait_for(|s| s.state == TransferState::Complete),
        )
        .await
        .expect("completes")
        .unwrap();
        assert_eq!(std::fs::read(fx.dir.path().join("queued.bin")).unwrap(), data);
    }

    #[tokio::test]
    async fn test_inconsistent_part_count_gets_no_transfer() {
        let mut fx = fixture();
        let mut wrong = descriptor("wrong.bin", &[3u8; 2500]);
        wrong.parts = 5;
        let right = descriptor("right.bin", b"fine");
        fx.manager.replace_listing(vec![wrong.clone(), right.clone()]);

        assert_eq!(fx.manager.files().len(), 2);
        assert!(fx.manager.state(&wrong.id).is_none());
        assert!(matches!(
            fx.manager.notify_requested(&wrong.id),
            Err(Error::UnknownFile(_))
        ));
        assert_eq!(fx.manager.state(&right.id), Some(TransferState::Idle));
    }

    #[tokio::test]
    async fn test_colliding_identifiers_keep_first() {
        let mut fx = fixture();
        let first = descriptor("first", b"same");
        let second = descriptor("second", b"same");
        fx.manager.replace_listing(vec![first.clone(), second]);

        assert_eq!(fx.manager.files().len(), 2);
        assert!(fx.manager.state(&first.id).is_some());
    }
}
