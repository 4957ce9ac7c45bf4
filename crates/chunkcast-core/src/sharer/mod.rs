//! Sharer side of Chunkcast.
//!
//! A [`Sharer`] owns the file catalog and the sharer transport. Once
//! spawned, its [`ControlResponder`] answers requests from any number of
//! receivers and drives the [`Broadcaster`] for `GET` and `PARTS`.
//!
//! ## Example
//!
//! ```rust,ignore
//! let sharer = Sharer::bind(&config).await?;
//! sharer.register(Path::new("video.mp4")).await?;
//! let handle = sharer.spawn();
//! // ...
//! handle.shutdown().await;
//! ```

pub mod broadcaster;
pub mod responder;

pub use broadcaster::{BroadcastSummary, Broadcaster, LossSimulator};
pub use responder::{BroadcastJob, ControlResponder};

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;

use crate::catalog::{FileCatalog, FileDescriptor, SharedFile};
use crate::config::{Config, LossConfig};
use crate::error::{Error, Result};
use crate::transport::SharerTransport;

/// Shares files with receivers on the local network.
#[derive(Debug)]
pub struct Sharer {
    catalog: Arc<RwLock<FileCatalog>>,
    transport: SharerTransport,
    chunk_size: usize,
    loss_tx: watch::Sender<LossConfig>,
}

impl Sharer {
    /// Bind the sharer transport using `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the sockets
    /// cannot be bound.
    pub async fn bind(config: &Config) -> Result<Self> {
        config.validate()?;
        let transport = SharerTransport::bind(&config.network).await?;
        let (loss_tx, _) = watch::channel(config.loss);

        Ok(Self {
            catalog: Arc::new(RwLock::new(FileCatalog::new(
                config.transfer.max_files,
                config.transfer.chunk_size,
            ))),
            transport,
            chunk_size: config.transfer.chunk_size,
            loss_tx,
        })
    }

    /// Register a file for sharing.
    ///
    /// The checksum is computed without holding the catalog lock, so a
    /// running responder keeps answering meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the catalog is full, or any
    /// error from inspecting the file.
    pub async fn register(&self, path: &Path) -> Result<FileDescriptor> {
        {
            let catalog = self.catalog.read().await;
            if catalog.is_full() {
                return Err(Error::CapacityExceeded {
                    max: catalog.max_files(),
                });
            }
        }

        let shared = SharedFile::from_path(path, self.chunk_size).await?;
        self.catalog.write().await.insert(shared)
    }

    /// Register the outcome of a file selection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSelection`] when nothing was selected, or any error
    /// from [`register`](Self::register).
    pub async fn register_selection(&self, selection: Option<PathBuf>) -> Result<FileDescriptor> {
        let path = selection.ok_or(Error::NoSelection)?;
        self.register(&path).await
    }

    /// Currently shared files in registration order.
    pub async fn files(&self) -> Vec<FileDescriptor> {
        self.catalog.read().await.list()
    }

    /// Change loss simulation for subsequent broadcasts.
    pub fn set_loss(&self, loss: LossConfig) {
        tracing::info!(
            "Loss simulation {} (p = {})",
            if loss.simulate { "enabled" } else { "disabled" },
            loss.probability
        );
        self.loss_tx.send_replace(loss);
    }

    /// Current loss simulation settings.
    #[must_use]
    pub fn loss(&self) -> LossConfig {
        *self.loss_tx.borrow()
    }

    /// Local address of the control socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be queried.
    pub fn control_addr(&self) -> Result<SocketAddr> {
        self.transport.control_addr()
    }

    /// Start answering control requests.
    #[must_use]
    pub fn spawn(&self) -> SharerHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let responder = ControlResponder::new(
            self.transport.control(),
            Arc::clone(&self.catalog),
            Broadcaster::new(
                self.transport.data_sender(),
                self.chunk_size,
                self.loss_tx.subscribe(),
            ),
        );

        tracing::info!(
            "Sharing on {:?}, broadcasting to {}",
            self.transport.control_addr().ok(),
            self.transport.data_sender().target()
        );

        let task = tokio::spawn(responder.run(shutdown_rx));
        SharerHandle { shutdown_tx, task }
    }
}

/// Handle to a running control responder.
#[derive(Debug)]
pub struct SharerHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SharerHandle {
    /// Stop answering requests and wait for the responder to exit.
    ///
    /// Broadcasts already in progress run to completion.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}
