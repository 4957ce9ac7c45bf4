//! Common test utilities for `Chunkcast` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use chunkcast_core::config::Config;
use chunkcast_core::protocol::FileId;
use chunkcast_core::receiver::{Receiver, TransferState};

/// Base port for tests, incremented for each test to avoid conflicts.
static TEST_PORT_COUNTER: AtomicU16 = AtomicU16::new(48600);

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Get unique ports for a test to avoid conflicts between parallel tests.
/// Returns (`control_port`, `data_port`).
pub fn get_test_ports() -> (u16, u16) {
    let base = TEST_PORT_COUNTER.fetch_add(2, Ordering::SeqCst);
    (base, base + 1)
}

/// Configuration running both roles over loopback on fresh ports.
pub fn loopback_config(downloads_dir: &Path) -> Config {
    let (control_port, data_port) = get_test_ports();
    let mut config = Config::default();
    config.network.control_port = control_port;
    config.network.data_port = data_port;
    config.network.broadcast_address = Ipv4Addr::LOCALHOST;
    config.network.server_address = Ipv4Addr::LOCALHOST;
    config.network.request_timeout = Duration::from_secs(1);
    config.transfer.downloads_dir = downloads_dir.to_path_buf();
    config
}

/// Wait until a transfer reaches `state`. Returns `false` on timeout.
pub async fn wait_for_state(
    receiver: &Receiver,
    id: &FileId,
    state: TransferState,
    timeout: Duration,
) -> bool {
    let Some(mut watch) = receiver.watch(id).await else {
        return false;
    };
    let reached = matches!(
        tokio::time::timeout(timeout, watch.wait_for(|s| s.state == state)).await,
        Ok(Ok(_))
    );
    reached
}
