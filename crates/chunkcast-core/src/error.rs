//! Error types for Chunkcast.
//!
//! Every failure is scoped to the operation or transfer that produced it;
//! there is no global error state.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A specialized `Result` type for Chunkcast operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Chunkcast.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested identifier is not in the sharer's catalog (E001)
    #[error("unknown file '{0}'")]
    UnknownFile(String),

    /// Catalog already holds the configured maximum of files (E002)
    #[error("catalog is full: at most {max} files can be shared")]
    CapacityExceeded {
        /// Configured maximum
        max: usize,
    },

    /// Unrecognized control command word (E003)
    #[error("command not implemented: {0}")]
    NotImplemented(String),

    /// Data frame too short to carry a header (E004)
    #[error("malformed data frame: {len} bytes")]
    MalformedFrame {
        /// Received datagram length
        len: usize,
    },

    /// Staged file does not match the declared checksum (E005)
    #[error("checksum mismatch for file '{file}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// File identifier
        file: String,
        /// Declared checksum
        expected: String,
        /// Checksum of the staged content
        actual: String,
    },

    /// A datagram could not be sent (E006)
    #[error("failed to send datagram to {addr}: {source}")]
    NetworkSendFailure {
        /// Destination address
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Control request was not answered in time (E007)
    #[error("control request timed out after {0} ms")]
    Timeout(u64),

    /// Control request could not be parsed
    #[error("malformed control request: {0}")]
    MalformedRequest(String),

    /// The sharer answered with an error reason we do not map to a variant
    #[error("sharer refused request: {0}")]
    Remote(String),

    /// Listed piece count does not match size and chunk size
    #[error("file '{file}' declares {declared} pieces, expected {expected} at this chunk size")]
    PartCountMismatch {
        /// File identifier
        file: String,
        /// Piece count from the listing
        declared: u32,
        /// Piece count derived from size and chunk size
        expected: u32,
    },

    /// File selection produced no path
    #[error("no file selected")]
    NoSelection,

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::UnknownFile(_) => Some("E001"),
            Self::CapacityExceeded { .. } => Some("E002"),
            Self::NotImplemented(_) => Some("E003"),
            Self::MalformedFrame { .. } => Some("E004"),
            Self::ChecksumMismatch { .. } => Some("E005"),
            Self::NetworkSendFailure { .. } => Some("E006"),
            Self::Timeout(_) => Some("E007"),
            _ => None,
        }
    }

    /// Returns whether this error is recoverable (can be retried).
    ///
    /// A checksum mismatch is terminal for its transfer; the user has to
    /// refresh the listing and request the file again.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NetworkSendFailure { .. } | Self::Timeout(_) | Self::Io(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
