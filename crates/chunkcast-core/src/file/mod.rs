//! File handling for Chunkcast.
//!
//! This module provides:
//! - Piece arithmetic shared by both ends of a transfer
//! - Random-access reading of pieces on the sharer side
//! - Staging storage for files being received
//! - Path sanitization and human-readable formatting

mod staging;

pub use staging::StagingFile;

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Error, Result};

/// Suffix appended to the final file name while a file is being received.
pub const STAGING_SUFFIX: &str = ".tmp";

/// Number of pieces a file of `size` bytes splits into.
///
/// # Panics
///
/// Panics if `chunk_size` is zero.
#[must_use]
pub fn part_count(size: u64, chunk_size: usize) -> u32 {
    let parts = size.div_ceil(chunk_size as u64);
    u32::try_from(parts).unwrap_or(u32::MAX)
}

/// Byte offset of piece `index`.
#[must_use]
pub fn piece_offset(index: u32, chunk_size: usize) -> u64 {
    u64::from(index) * chunk_size as u64
}

/// Expected payload length of piece `index`.
///
/// Every piece is `chunk_size` bytes long except the last, which carries the
/// remainder. Returns `None` for an index outside the file.
#[must_use]
pub fn piece_len(index: u32, size: u64, chunk_size: usize) -> Option<usize> {
    let offset = piece_offset(index, chunk_size);
    if offset >= size {
        return None;
    }
    let remaining = size - offset;
    Some(usize::try_from(remaining).map_or(chunk_size, |r| r.min(chunk_size)))
}

/// Reads pieces of a shared file at arbitrary offsets.
#[derive(Debug)]
pub struct PieceReader {
    file: tokio::fs::File,
    size: u64,
    chunk_size: usize,
}

impl PieceReader {
    /// Open `path` for piece reads.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub async fn open(path: &Path, size: u64, chunk_size: usize) -> Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self {
            file,
            size,
            chunk_size,
        })
    }

    /// Read the bytes of piece `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] when the index lies past the end of the
    /// file, or an I/O error if the read fails.
    pub async fn read_piece(&mut self, index: u32) -> Result<Vec<u8>> {
        let len = piece_len(index, self.size, self.chunk_size).ok_or_else(|| {
            Error::InvalidPath(format!("piece {index} is beyond the end of the file"))
        })?;

        self.file
            .seek(std::io::SeekFrom::Start(piece_offset(index, self.chunk_size)))
            .await?;
        let mut buffer = vec![0u8; len];
        self.file.read_exact(&mut buffer).await?;
        Ok(buffer)
    }
}

/// Sanitize a received file name into a path under `base`.
///
/// The name must be a single plain path component; separators, `..` and
/// absolute paths are refused.
///
/// # Returns
///
/// The joined path, or None if the name is unsafe.
#[must_use]
pub fn sanitize_path(base: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    let mut components = relative.components();

    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return None,
    }

    let full_path = base.join(relative);

    if full_path.starts_with(base) {
        Some(full_path)
    } else {
        None
    }
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Format an elapsed duration as zero-padded "MM:SS".
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = (elapsed.as_millis() + 500) / 1000;
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    format!("{mins:02}:{secs:02}")
}

/// Format a transfer rate as "<size>/s".
#[must_use]
pub fn format_rate(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return format!("{}/s", format_size(bytes));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rate = (bytes as f64 / secs) as u64;
    format!("{}/s", format_size(rate))
}
