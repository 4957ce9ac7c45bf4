//! Checksums for Chunkcast.
//!
//! Every shared file is identified and verified by the SHA-256 digest of its
//! whole content, rendered as lowercase hex. The first [`ID_LEN`] characters
//! of that digest form the file identifier used on the wire.

use std::fmt::Write as _;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::Result;

/// Number of hex characters of the checksum used as file identifier.
pub const ID_LEN: usize = 8;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Compute SHA-256 hash of data.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Render a digest as lowercase hex.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}

/// SHA-256 hex checksum of an in-memory buffer.
#[must_use]
pub fn checksum_bytes(data: &[u8]) -> String {
    to_hex(&sha256(data))
}

/// SHA-256 hex checksum of a file, streamed from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub async fn checksum_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(to_hex(&hasher.finalize()))
}

/// Derive the wire identifier from a hex checksum.
///
/// Checksums shorter than [`ID_LEN`] are used whole.
#[must_use]
pub fn identifier_from_checksum(checksum: &str) -> String {
    checksum.chars().take(ID_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_checksum_bytes_known_vector() {
        assert_eq!(checksum_bytes(b""), EMPTY_SHA256);
        assert_eq!(
            checksum_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_identifier_from_checksum() {
        assert_eq!(identifier_from_checksum(EMPTY_SHA256), "e3b0c442");
        assert_eq!(identifier_from_checksum("abc"), "abc");
    }

    #[tokio::test]
    async fn test_checksum_file_matches_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let from_file = checksum_file(&path).await.expect("checksum file");
        assert_eq!(from_file, checksum_bytes(&content));
    }

    #[tokio::test]
    async fn test_checksum_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = checksum_file(&temp_dir.path().join("nope")).await;
        assert!(result.is_err());
    }
}
