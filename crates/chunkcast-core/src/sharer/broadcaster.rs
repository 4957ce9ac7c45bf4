//! Chunk broadcaster.
//!
//! Reads pieces of a shared file, frames them and sends them to the
//! broadcast target. Frames can be dropped on purpose to exercise receiver
//! recovery; dropping is invisible to the control response and never retried.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;

use crate::catalog::SharedFile;
use crate::config::LossConfig;
use crate::file::PieceReader;
use crate::protocol::DataFrame;
use crate::transport::DataSender;

/// Decides independently for each frame whether to drop it.
#[derive(Debug)]
pub struct LossSimulator {
    config: LossConfig,
    rng: StdRng,
}

impl LossSimulator {
    /// Create a simulator seeded from the OS.
    #[must_use]
    pub fn new(config: LossConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a simulator with a fixed seed.
    #[must_use]
    pub fn with_seed(config: LossConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Whether the next frame should be dropped.
    pub fn should_drop(&mut self) -> bool {
        self.config.simulate && self.rng.gen_bool(self.config.probability.clamp(0.0, 1.0))
    }
}

/// Counters for one broadcast run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    /// Frames handed to the socket
    pub sent: usize,
    /// Frames dropped by loss simulation
    pub dropped: usize,
    /// Frames that could not be read or sent
    pub failed: usize,
}

/// Frames and sends pieces of shared files.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: DataSender,
    chunk_size: usize,
    loss: watch::Receiver<LossConfig>,
}

impl Broadcaster {
    /// Create a broadcaster.
    ///
    /// The loss settings are read at the start of every run, so changes made
    /// through the watch channel apply to the next request.
    #[must_use]
    pub const fn new(
        sender: DataSender,
        chunk_size: usize,
        loss: watch::Receiver<LossConfig>,
    ) -> Self {
        Self {
            sender,
            chunk_size,
            loss,
        }
    }

    /// Broadcast the given pieces of `file` in order.
    ///
    /// Failures are counted and logged; they never abort the run.
    pub async fn broadcast(
        &self,
        file: &SharedFile,
        indices: impl IntoIterator<Item = u32>,
    ) -> BroadcastSummary {
        let loss = LossSimulator::new(*self.loss.borrow());
        self.broadcast_with(file, indices, loss).await
    }

    /// Broadcast with an explicit loss simulator.
    pub async fn broadcast_with(
        &self,
        file: &SharedFile,
        indices: impl IntoIterator<Item = u32>,
        mut loss: LossSimulator,
    ) -> BroadcastSummary {
        let id = file.descriptor.id;
        let mut summary = BroadcastSummary::default();
        let indices: Vec<u32> = indices.into_iter().collect();

        let mut reader =
            match PieceReader::open(&file.path, file.descriptor.size, self.chunk_size).await {
                Ok(reader) => reader,
                Err(e) => {
                    tracing::warn!("Cannot open {} for broadcasting: {}", file.path.display(), e);
                    summary.failed = indices.len();
                    return summary;
                }
            };

        for index in indices {
            let payload = match reader.read_piece(index).await {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Failed to read piece {} of {}: {}", index, id, e);
                    summary.failed += 1;
                    continue;
                }
            };

            if loss.should_drop() {
                tracing::trace!("Dropping piece {} of {} (simulated loss)", index, id);
                summary.dropped += 1;
                continue;
            }

            let frame = DataFrame { id, index, payload }.encode();
            match self.sender.send(&frame).await {
                Ok(()) => summary.sent += 1,
                Err(e) => {
                    tracing::warn!("{}", e);
                    summary.failed += 1;
                }
            }
        }

        tracing::debug!(
            "Broadcast of {} finished: {} sent, {} dropped, {} failed",
            id,
            summary.sent,
            summary.dropped,
            summary.failed
        );
        summary
    }
}
