//! Staging storage for files being received.
//!
//! A staging file lives next to its final destination under a `.tmp` name,
//! is preallocated to the declared size and filled piece by piece in any
//! order. Only a verified staging file is renamed to the final name.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::STAGING_SUFFIX;
use crate::error::{Error, Result};

/// A preallocated, randomly writable file awaiting verification.
#[derive(Debug)]
pub struct StagingFile {
    staging_path: PathBuf,
    final_path: PathBuf,
    size: u64,
    file: Option<tokio::fs::File>,
}

impl StagingFile {
    /// Create (or truncate) the staging file for `final_path` and extend it
    /// to `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub async fn open_preallocated(final_path: PathBuf, size: u64) -> Result<Self> {
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut staging_name = final_path
            .file_name()
            .ok_or_else(|| Error::InvalidPath(final_path.display().to_string()))?
            .to_os_string();
        staging_name.push(STAGING_SUFFIX);
        let staging_path = final_path.with_file_name(staging_name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging_path)
            .await?;
        file.set_len(size).await?;

        Ok(Self {
            staging_path,
            final_path,
            size,
            file: Some(file),
        })
    }

    /// Write `data` at byte `offset`.
    ///
    /// Rewriting the same bytes at the same offset leaves the content unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the write would extend past the declared size, the
    /// file was already closed, or the write fails.
    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.size {
            return Err(Error::InvalidPath(format!(
                "write of {} bytes at {offset} exceeds staging size {}",
                data.len(),
                self.size
            )));
        }
        let file = self.handle()?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(())
    }

    /// Read `len` bytes at byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file was already closed or the read fails.
    pub async fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let file = self.handle()?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer).await?;
        Ok(buffer)
    }

    /// Flush and close the underlying handle. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be synced.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    /// SHA-256 hex checksum of the staged content.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging file cannot be read.
    pub async fn checksum(&self) -> Result<String> {
        crate::crypto::checksum_file(&self.staging_path).await
    }

    /// Atomically move the staging file to its final name.
    ///
    /// # Errors
    ///
    /// Returns an error if closing or renaming fails.
    pub async fn rename(mut self) -> Result<PathBuf> {
        self.close().await?;
        tokio::fs::rename(&self.staging_path, &self.final_path).await?;
        Ok(self.final_path)
    }

    /// Path of the `.tmp` file.
    #[must_use]
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// Path the file is renamed to once verified.
    #[must_use]
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    fn handle(&mut self) -> Result<&mut tokio::fs::File> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::Internal("staging file already closed".into()))
    }
}
