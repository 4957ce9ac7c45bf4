//! Stall detection for receiving transfers.
//!
//! Each receiving transfer is checked on a jittered timer. A check reports
//! progress while pieces are missing, and when nothing has been written for
//! longer than the stall threshold it asks for the missing pieces again,
//! split into batches small enough for one `PARTS` datagram each.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::config::RecoveryConfig;

/// Outcome of one recovery check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Nothing is missing
    Done,
    /// Report progress only
    ReportProgress,
    /// Report progress and request the missing pieces again
    RequestMissing,
}

/// Schedules and evaluates recovery checks for one transfer.
#[derive(Debug)]
pub struct RecoveryScheduler {
    config: RecoveryConfig,
    rng: StdRng,
}

impl RecoveryScheduler {
    /// Create a scheduler seeded from the OS.
    #[must_use]
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a scheduler with a fixed seed.
    #[must_use]
    pub fn with_seed(config: RecoveryConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Delay until the next check, uniform within the configured bounds.
    pub fn next_delay(&mut self) -> Duration {
        let min = self.config.check_interval_min;
        let max = self.config.check_interval_max;
        if min >= max {
            return min;
        }
        self.rng.gen_range(min..=max)
    }

    /// Decide what a check at `now` should do.
    #[must_use]
    pub fn evaluate(&self, missing: usize, last_write: Option<Instant>, now: Instant) -> RecoveryAction {
        if missing == 0 {
            return RecoveryAction::Done;
        }

        let stalled = last_write
            .is_some_and(|at| now.saturating_duration_since(at) > self.config.stall_threshold);

        if self.config.enabled && stalled {
            RecoveryAction::RequestMissing
        } else {
            RecoveryAction::ReportProgress
        }
    }

    /// Maximum indices per request.
    #[must_use]
    pub const fn batch_limit(&self) -> usize {
        self.config.batch_limit
    }
}

/// Split ascending `indices` into batches of at most `limit`.
///
/// Every index lands in exactly one batch.
#[must_use]
pub fn batch_indices(indices: impl IntoIterator<Item = u32>, limit: usize) -> Vec<Vec<u32>> {
    let limit = limit.max(1);
    let indices: Vec<u32> = indices.into_iter().collect();
    indices.chunks(limit).map(<[u32]>::to_vec).collect()
}
