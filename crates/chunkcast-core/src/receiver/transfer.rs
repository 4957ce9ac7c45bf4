//! Per-file transfer state machine.
//!
//! ```text
//! Idle ──first frame──▶ Receiving ──missing empty──▶ Verifying ──┬──▶ Complete
//!                                                               └──▶ Corrupted
//! ```
//!
//! A transfer only ever shrinks its missing set. Pieces are written to a
//! `.tmp` staging file at their final offset; once every piece is present the
//! staging file is checksummed exactly once and renamed on a match.
//!
//! Each transfer runs on its own task fed by [`TransferCommand`]s, so its
//! state is only mutated by that task.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::recovery::{batch_indices, RecoveryAction, RecoveryScheduler};
use crate::catalog::FileDescriptor;
use crate::error::{Error, Result};
use crate::file::{
    format_elapsed, format_rate, part_count, piece_len, piece_offset, sanitize_path, StagingFile,
};
use crate::protocol::FileId;

/// Frames queued per transfer before new ones are dropped.
pub const COMMAND_QUEUE_SIZE: usize = 4096;

/// Transfer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    /// Listed, no piece received yet
    #[default]
    Idle,
    /// Pieces are arriving
    Receiving,
    /// All pieces present, checksum running
    Verifying,
    /// Verified and renamed to the final name
    Complete,
    /// Checksum mismatch; terminal
    Corrupted,
}

impl TransferState {
    /// Whether the transfer can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Corrupted)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Receiving => write!(f, "Receiving"),
            Self::Verifying => write!(f, "Verifying"),
            Self::Complete => write!(f, "Complete"),
            Self::Corrupted => write!(f, "Corrupted"),
        }
    }
}

/// Pieces received so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferProgress {
    /// Pieces written
    pub received: u32,
    /// Total pieces
    pub parts: u32,
}

impl TransferProgress {
    /// Completed fraction in `[0, 1]`. A zero-part file counts as done.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.parts == 0 {
            1.0
        } else {
            f64::from(self.received) / f64::from(self.parts)
        }
    }

    /// Completed percentage, rounded.
    #[must_use]
    pub fn percent(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = (self.fraction() * 100.0).round() as u32;
        percent
    }
}

/// Read-only view of a transfer published after every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferSnapshot {
    /// Current state
    pub state: TransferState,
    /// Current progress
    pub progress: TransferProgress,
}

/// Human-readable status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// First piece arrived
    Receiving,
    /// Periodic progress report
    Downloading(TransferProgress),
    /// Checksum running
    Verifying,
    /// Verified and saved
    Downloaded {
        /// Time from first piece to last piece
        elapsed: Duration,
        /// File size in bytes
        size: u64,
    },
    /// Checksum mismatch
    Corrupted,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receiving => write!(f, "Receiving"),
            Self::Downloading(progress) => write!(
                f,
                "Downloading: {}% ({}/{})",
                progress.percent(),
                progress.received,
                progress.parts
            ),
            Self::Verifying => write!(f, "Verifying"),
            Self::Downloaded { elapsed, size } => write!(
                f,
                "Downloaded in {}, {}",
                format_elapsed(*elapsed),
                format_rate(*size, *elapsed)
            ),
            Self::Corrupted => write!(f, "Corrupted"),
        }
    }
}

/// A status change of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// File the status belongs to
    pub file_id: FileId,
    /// New status
    pub status: TransferStatus,
}

/// Request to rebroadcast pieces of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartsRequest {
    /// File identifier
    pub id: FileId,
    /// Missing piece indices, ascending
    pub indices: Vec<u32>,
}

/// One recovery cycle: the whole missing set of a transfer, in batches.
///
/// A transfer has at most one cycle queued or being sent. The next cycle
/// can start only once this request is dropped.
#[derive(Debug)]
pub struct RecoveryRequest {
    /// Batches in ascending index order
    pub batches: Vec<PartsRequest>,
    snapshot: watch::Receiver<TransferSnapshot>,
    _cycle: CycleGuard,
}

impl RecoveryRequest {
    /// Whether the transfer still exists and still needs pieces.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.snapshot.has_changed().is_ok()
            && self.snapshot.borrow().state == TransferState::Receiving
    }
}

/// Clears a transfer's in-flight flag when its cycle is dropped.
#[derive(Debug)]
struct CycleGuard(Arc<AtomicBool>);

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Work sent to a transfer task.
#[derive(Debug)]
pub enum TransferCommand {
    /// A data frame for this file
    Frame {
        /// Piece index
        index: u32,
        /// Piece bytes
        payload: Vec<u8>,
    },
    /// The user asked the sharer for this file
    Requested,
    /// Ask for every currently missing piece again
    RequestMissing,
}

/// What happened to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Not needed, out of range, wrong length or transfer finished
    Discarded,
    /// Written; more pieces missing
    Written,
    /// Could not be written; the piece stays missing
    WriteFailed,
    /// Last missing piece written; verification finished in the given state
    Finished(TransferState),
}

/// Receiver-side state of one listed file.
#[derive(Debug)]
pub struct Transfer {
    descriptor: FileDescriptor,
    chunk_size: usize,
    final_path: PathBuf,
    state: TransferState,
    missing: BTreeSet<u32>,
    staging: Option<StagingFile>,
    started_at: Option<Instant>,
    last_write: Option<Instant>,
    finished_at: Option<Instant>,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
}

impl Transfer {
    /// Create an idle transfer for a listed file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the file name is not a plain name,
    /// or [`Error::PartCountMismatch`] if the declared piece count does not
    /// fit the size at this chunk size.
    pub fn new(
        descriptor: FileDescriptor,
        chunk_size: usize,
        downloads_dir: &Path,
        status_tx: mpsc::UnboundedSender<StatusUpdate>,
    ) -> Result<Self> {
        let final_path = sanitize_path(downloads_dir, &descriptor.name)
            .ok_or_else(|| Error::InvalidPath(descriptor.name.clone()))?;

        let expected = part_count(descriptor.size, chunk_size);
        if descriptor.parts != expected {
            return Err(Error::PartCountMismatch {
                file: descriptor.id.to_string(),
                declared: descriptor.parts,
                expected,
            });
        }

        Ok(Self {
            missing: (0..descriptor.parts).collect(),
            descriptor,
            chunk_size,
            final_path,
            state: TransferState::Idle,
            staging: None,
            started_at: None,
            last_write: None,
            finished_at: None,
            status_tx,
        })
    }

    /// Apply one data frame.
    pub async fn accept_frame(&mut self, index: u32, payload: &[u8]) -> FrameOutcome {
        if self.state.is_terminal() || !self.missing.contains(&index) {
            return FrameOutcome::Discarded;
        }
        if piece_len(index, self.descriptor.size, self.chunk_size) != Some(payload.len()) {
            tracing::trace!(
                "Discarding piece {} of {}: {} bytes",
                index,
                self.descriptor.id,
                payload.len()
            );
            return FrameOutcome::Discarded;
        }

        if self.state == TransferState::Idle && !self.start().await {
            return FrameOutcome::WriteFailed;
        }

        let Some(staging) = self.staging.as_mut() else {
            return FrameOutcome::WriteFailed;
        };
        if let Err(e) = staging
            .write_at(piece_offset(index, self.chunk_size), payload)
            .await
        {
            tracing::warn!(
                "Failed to write piece {} of {}: {}",
                index,
                self.descriptor.id,
                e
            );
            return FrameOutcome::WriteFailed;
        }

        self.missing.remove(&index);
        self.last_write = Some(Instant::now());

        if self.missing.is_empty() {
            FrameOutcome::Finished(self.verify().await)
        } else {
            FrameOutcome::Written
        }
    }

    /// Handle the user requesting this file.
    ///
    /// A zero-byte file never receives frames, so it is created and verified
    /// right away.
    pub async fn on_requested(&mut self) -> TransferState {
        if self.descriptor.parts == 0 && self.state == TransferState::Idle && self.start().await {
            self.verify().await;
        }
        self.state
    }

    async fn start(&mut self) -> bool {
        match StagingFile::open_preallocated(self.final_path.clone(), self.descriptor.size).await {
            Ok(staging) => {
                self.staging = Some(staging);
                self.state = TransferState::Receiving;
                self.started_at = Some(Instant::now());
                tracing::info!("Receiving {} ({})", self.descriptor.name, self.descriptor.id);
                self.emit(TransferStatus::Receiving);
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Cannot open staging file for {}: {}",
                    self.descriptor.id,
                    e
                );
                false
            }
        }
    }

    async fn verify(&mut self) -> TransferState {
        self.finished_at = Some(Instant::now());
        self.state = TransferState::Verifying;
        self.emit(TransferStatus::Verifying);

        let Some(staging) = self.staging.take() else {
            return self.fail(&Error::Internal("no staging file".into()));
        };

        match check_and_rename(staging, &self.descriptor).await {
            Ok(path) => {
                self.state = TransferState::Complete;
                tracing::info!("Saved {} to {}", self.descriptor.id, path.display());
                self.emit(TransferStatus::Downloaded {
                    elapsed: self.elapsed(),
                    size: self.descriptor.size,
                });
                self.state
            }
            Err(e) => self.fail(&e),
        }
    }

    fn fail(&mut self, error: &Error) -> TransferState {
        tracing::warn!("Transfer of {} failed: {}", self.descriptor.id, error);
        self.state = TransferState::Corrupted;
        self.emit(TransferStatus::Corrupted);
        self.state
    }

    fn emit(&self, status: TransferStatus) {
        let _ = self.status_tx.send(StatusUpdate {
            file_id: self.descriptor.id,
            status,
        });
    }

    /// Emit a progress report.
    pub fn report_progress(&self) {
        self.emit(TransferStatus::Downloading(self.progress()));
    }

    fn elapsed(&self) -> Duration {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TransferState {
        self.state
    }

    /// Pieces received so far.
    #[must_use]
    pub fn progress(&self) -> TransferProgress {
        let parts = self.descriptor.parts;
        let missing = u32::try_from(self.missing.len()).unwrap_or(parts);
        TransferProgress {
            received: parts - missing,
            parts,
        }
    }

    /// Snapshot of state and progress.
    #[must_use]
    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            state: self.state,
            progress: self.progress(),
        }
    }

    /// Missing piece indices, ascending.
    #[must_use]
    pub const fn missing(&self) -> &BTreeSet<u32> {
        &self.missing
    }

    /// Time of the last successful write.
    #[must_use]
    pub const fn last_write(&self) -> Option<Instant> {
        self.last_write
    }

    /// Declared metadata.
    #[must_use]
    pub const fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    /// Where the verified file ends up.
    #[must_use]
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }
}

async fn check_and_rename(mut staging: StagingFile, descriptor: &FileDescriptor) -> Result<PathBuf> {
    staging.close().await?;
    let actual = staging.checksum().await?;
    if actual != descriptor.sum {
        return Err(Error::ChecksumMismatch {
            file: descriptor.id.to_string(),
            expected: descriptor.sum.clone(),
            actual,
        });
    }
    staging.rename().await
}

/// Channel ends kept by the transfer manager.
///
/// Dropping the handle aborts the transfer task, discarding frames still
/// queued for it.
#[derive(Debug)]
pub struct TransferHandle {
    commands: mpsc::Sender<TransferCommand>,
    snapshot: watch::Receiver<TransferSnapshot>,
    task: JoinHandle<()>,
}

impl Drop for TransferHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TransferHandle {
    /// Queue a command without waiting.
    ///
    /// Returns `false` if the queue is full or the task is gone.
    pub fn try_send(&self, command: TransferCommand) -> bool {
        self.commands.try_send(command).is_ok()
    }

    /// Latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TransferSnapshot {
        *self.snapshot.borrow()
    }

    /// Subscribe to snapshot changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<TransferSnapshot> {
        self.snapshot.clone()
    }
}

/// Run `transfer` on its own task.
///
/// The task stops when its [`TransferHandle`] is dropped, which is how a
/// listing refresh abandons in-flight transfers.
pub fn spawn_transfer(
    transfer: Transfer,
    scheduler: RecoveryScheduler,
    parts_tx: mpsc::UnboundedSender<RecoveryRequest>,
) -> TransferHandle {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
    let (snapshot_tx, snapshot_rx) = watch::channel(transfer.snapshot());

    let task = tokio::spawn(run_transfer(
        transfer,
        scheduler,
        commands_rx,
        snapshot_tx,
        parts_tx,
    ));

    TransferHandle {
        commands: commands_tx,
        snapshot: snapshot_rx,
        task,
    }
}

async fn run_transfer(
    mut transfer: Transfer,
    mut scheduler: RecoveryScheduler,
    mut commands: mpsc::Receiver<TransferCommand>,
    snapshot_tx: watch::Sender<TransferSnapshot>,
    parts_tx: mpsc::UnboundedSender<RecoveryRequest>,
) {
    let mut next_check: Option<Instant> = None;
    let cycle = Arc::new(AtomicBool::new(false));
    let recovery = Recovery {
        batch_limit: scheduler.batch_limit(),
        cycle: &cycle,
        snapshot_tx: &snapshot_tx,
        parts_tx: &parts_tx,
    };

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    TransferCommand::Frame { index, payload } => {
                        if transfer.accept_frame(index, &payload).await == FrameOutcome::Discarded {
                            tracing::trace!("Ignored piece {} of {}", index, transfer.descriptor.id);
                        }
                    }
                    TransferCommand::Requested => {
                        transfer.on_requested().await;
                    }
                    TransferCommand::RequestMissing => {
                        recovery.request_missing(&transfer);
                    }
                }
            }
            () = wait_until(next_check) => {
                next_check = None;
                let action = scheduler.evaluate(
                    transfer.missing.len(),
                    transfer.last_write,
                    Instant::now(),
                );
                if action != RecoveryAction::Done {
                    transfer.report_progress();
                }
                if action == RecoveryAction::RequestMissing {
                    tracing::debug!("Transfer {} stalled, requesting missing pieces", transfer.descriptor.id);
                    recovery.request_missing(&transfer);
                }
            }
        }

        if transfer.state == TransferState::Receiving {
            if next_check.is_none() {
                next_check = Some(Instant::now() + scheduler.next_delay());
            }
        } else {
            next_check = None;
        }

        let snapshot = transfer.snapshot();
        snapshot_tx.send_if_modified(|current| {
            let changed = *current != snapshot;
            *current = snapshot;
            changed
        });
    }

    tracing::debug!("Transfer task for {} stopped", transfer.descriptor.id);
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct Recovery<'a> {
    batch_limit: usize,
    cycle: &'a Arc<AtomicBool>,
    snapshot_tx: &'a watch::Sender<TransferSnapshot>,
    parts_tx: &'a mpsc::UnboundedSender<RecoveryRequest>,
}

impl Recovery<'_> {
    /// Queue a recovery cycle unless one is still in flight.
    fn request_missing(&self, transfer: &Transfer) {
        let id = transfer.descriptor.id;
        if transfer.state != TransferState::Receiving {
            return;
        }
        if self.cycle.swap(true, Ordering::AcqRel) {
            tracing::debug!("Recovery for {} still in flight, skipping", id);
            return;
        }

        let batches = batch_indices(transfer.missing.iter().copied(), self.batch_limit)
            .into_iter()
            .map(|indices| PartsRequest { id, indices })
            .collect();
        let request = RecoveryRequest {
            batches,
            snapshot: self.snapshot_tx.subscribe(),
            _cycle: CycleGuard(Arc::clone(self.cycle)),
        };
        if self.parts_tx.send(request).is_err() {
            tracing::debug!("Retransmission task gone, dropping recovery for {}", id);
        }
    }
}
