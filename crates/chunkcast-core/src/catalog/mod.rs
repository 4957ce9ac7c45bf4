//! Registry of files offered by a sharer.
//!
//! Entries are appended in registration order and never removed. Two files
//! with identical content derive the same identifier; both are listed and
//! lookups resolve to the one registered first.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::{Error, Result};
use crate::file::part_count;
use crate::protocol::FileId;

/// The catalog-visible description of a shared file.
///
/// Serialized as `{id, name, size, parts, sum}` in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// First 8 hex characters of the checksum
    pub id: FileId,
    /// Display name (file name without directories)
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Number of pieces
    pub parts: u32,
    /// Whole-file SHA-256 checksum, hex
    pub sum: String,
}

/// A file registered with the sharer.
#[derive(Debug, Clone)]
pub struct SharedFile {
    /// Wire-visible metadata
    pub descriptor: FileDescriptor,
    /// Absolute path on the sharer's disk
    pub path: PathBuf,
}

impl SharedFile {
    /// Inspect a file on disk and derive its metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] for missing paths and directories, or
    /// an I/O error if the file cannot be read.
    pub async fn from_path(path: &Path, chunk_size: usize) -> Result<Self> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| Error::FileNotFound(path.display().to_string()))?;
        if !metadata.is_file() {
            return Err(Error::FileNotFound(path.display().to_string()));
        }

        let path = tokio::fs::canonicalize(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;

        let sum = crypto::checksum_file(&path).await?;
        let size = metadata.len();

        Ok(Self {
            descriptor: FileDescriptor {
                id: FileId::from_checksum(&sum)?,
                name,
                size,
                parts: part_count(size, chunk_size),
                sum,
            },
            path,
        })
    }

    /// Identifier of the file.
    #[must_use]
    pub const fn id(&self) -> &FileId {
        &self.descriptor.id
    }
}

/// Ordered registry of shared files.
#[derive(Debug)]
pub struct FileCatalog {
    files: Vec<SharedFile>,
    max_files: usize,
    chunk_size: usize,
}

impl FileCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub const fn new(max_files: usize, chunk_size: usize) -> Self {
        Self {
            files: Vec::new(),
            max_files,
            chunk_size,
        }
    }

    /// Register a file for sharing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the catalog is full, leaving
    /// it unchanged, or any error from inspecting the file.
    pub async fn register(&mut self, path: &Path) -> Result<FileDescriptor> {
        if self.is_full() {
            return Err(Error::CapacityExceeded {
                max: self.max_files,
            });
        }

        let shared = SharedFile::from_path(path, self.chunk_size).await?;
        self.insert(shared)
    }

    /// Append an already inspected file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the catalog is full.
    pub fn insert(&mut self, shared: SharedFile) -> Result<FileDescriptor> {
        if self.is_full() {
            return Err(Error::CapacityExceeded {
                max: self.max_files,
            });
        }

        let descriptor = shared.descriptor.clone();

        if self.find(&descriptor.id).is_some() {
            tracing::warn!(
                "File {} shares identifier {} with an earlier entry",
                descriptor.name,
                descriptor.id
            );
        }
        tracing::info!(
            "Registered {} as {} ({} bytes, {} parts)",
            descriptor.name,
            descriptor.id,
            descriptor.size,
            descriptor.parts
        );

        self.files.push(shared);
        Ok(descriptor)
    }

    /// Register the outcome of a file selection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSelection`] when nothing was selected, or any error
    /// from [`register`](Self::register).
    pub async fn register_selection(&mut self, selection: Option<PathBuf>) -> Result<FileDescriptor> {
        let path = selection.ok_or(Error::NoSelection)?;
        self.register(&path).await
    }

    /// Descriptors of all registered files in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<FileDescriptor> {
        self.files.iter().map(|f| f.descriptor.clone()).collect()
    }

    /// Look up a file by identifier.
    #[must_use]
    pub fn find(&self, id: &FileId) -> Option<&SharedFile> {
        self.files.iter().find(|f| f.id() == id)
    }

    /// Number of registered files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether nothing is registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Whether another registration would exceed the limit.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.files.len() >= self.max_files
    }

    /// Maximum number of files.
    #[must_use]
    pub const fn max_files(&self) -> usize {
        self.max_files
    }

    /// Piece size used for part counts.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}
