//! Receiver side of Chunkcast.
//!
//! A [`Receiver`] listens on the data port, keeps one [`Transfer`] per file
//! of the latest listing and asks the sharer for files and lost pieces.
//!
//! ## Tasks
//!
//! - **data listener**: decodes frames and hands them to the [`TransferManager`]
//! - **one task per transfer**: applies frames and runs stall recovery
//! - **retransmission task**: sends the `PARTS` requests transfers queue up
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut receiver = Receiver::bind(&config).await?;
//! let mut updates = receiver.take_status_updates().expect("first call");
//!
//! let files = receiver.refresh_listing().await?;
//! receiver.request_file(&files[0].id).await?;
//!
//! while let Some(update) = updates.recv().await {
//!     println!("{}: {}", update.file_id, update.status);
//! }
//! ```

pub mod client;
pub mod manager;
pub mod recovery;
pub mod transfer;

pub use client::ControlClient;
pub use manager::TransferManager;
pub use recovery::{batch_indices, RecoveryAction, RecoveryScheduler};
pub use transfer::{
    FrameOutcome, PartsRequest, RecoveryRequest, StatusUpdate, Transfer, TransferProgress,
    TransferSnapshot, TransferState, TransferStatus,
};

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::catalog::FileDescriptor;
use crate::config::Config;
use crate::error::Result;
use crate::protocol::{DataFrame, FileId};
use crate::transport::ReceiverTransport;

/// Discovers, requests and reassembles shared files.
#[derive(Debug)]
pub struct Receiver {
    client: Arc<ControlClient>,
    manager: Arc<RwLock<TransferManager>>,
    status_rx: Option<mpsc::UnboundedReceiver<StatusUpdate>>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Receiver {
    /// Bind the receiver transport and start the background tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the sockets
    /// cannot be bound.
    pub async fn bind(config: &Config) -> Result<Self> {
        config.validate()?;
        let transport = ReceiverTransport::bind(&config.network).await?;

        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (parts_tx, parts_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let client = Arc::new(ControlClient::new(
            transport.control,
            transport.server,
            config.network.request_timeout,
        ));
        let manager = Arc::new(RwLock::new(TransferManager::new(
            config.transfer.chunk_size,
            config.transfer.downloads_dir.clone(),
            config.recovery.clone(),
            status_tx,
            parts_tx,
        )));

        let tasks = vec![
            tokio::spawn(listen_for_frames(
                transport.data,
                Arc::clone(&manager),
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(retransmit(
                Arc::clone(&client),
                parts_rx,
                shutdown_tx.subscribe(),
            )),
        ];

        Ok(Self {
            client,
            manager,
            status_rx: Some(status_rx),
            shutdown_tx,
            tasks,
        })
    }

    /// Take the stream of status updates. Only the first call returns it.
    pub fn take_status_updates(&mut self) -> Option<mpsc::UnboundedReceiver<StatusUpdate>> {
        self.status_rx.take()
    }

    /// Fetch the sharer's listing and replace every transfer with it.
    ///
    /// # Errors
    ///
    /// Returns an error if the sharer does not answer or refuses.
    pub async fn refresh_listing(&self) -> Result<Vec<FileDescriptor>> {
        let files = self.client.list().await?;
        tracing::info!("Sharer lists {} files", files.len());
        self.manager.write().await.replace_listing(files.clone());
        Ok(files)
    }

    /// Ask the sharer to broadcast a file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownFile`] if the sharer does not know the
    /// file, or [`crate::Error::Timeout`] if it does not answer.
    pub async fn request_file(&self, id: &FileId) -> Result<()> {
        self.client.get(id).await?;
        if let Err(e) = self.manager.read().await.notify_requested(id) {
            tracing::debug!("Requested {} outside the current listing: {}", id, e);
        }
        Ok(())
    }

    /// Ask the sharer again for every piece `id` is missing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownFile`] if `id` is not in the listing.
    pub async fn request_missing(&self, id: &FileId) -> Result<()> {
        self.manager.read().await.request_missing(id)
    }

    /// Files of the current listing.
    pub async fn files(&self) -> Vec<FileDescriptor> {
        self.manager.read().await.files().to_vec()
    }

    /// Current state of a transfer.
    pub async fn state(&self, id: &FileId) -> Option<TransferState> {
        self.manager.read().await.state(id)
    }

    /// Current progress of a transfer.
    pub async fn progress(&self, id: &FileId) -> Option<TransferProgress> {
        self.manager.read().await.progress(id)
    }

    /// Subscribe to a transfer's snapshots.
    pub async fn watch(&self, id: &FileId) -> Option<watch::Receiver<TransferSnapshot>> {
        self.manager.read().await.watch(id)
    }

    /// Control client used for requests.
    #[must_use]
    pub fn client(&self) -> &ControlClient {
        &self.client
    }

    /// Stop the background tasks and wait for them.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn listen_for_frames(
    socket: UdpSocket,
    manager: Arc<RwLock<TransferManager>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; crate::MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, _)) => match DataFrame::decode(&buf[..len]) {
                        Ok(frame) => manager.read().await.route_frame(frame),
                        Err(e) => tracing::trace!("Dropping datagram: {}", e),
                    },
                    Err(e) => tracing::warn!("Data socket receive error: {}", e),
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Data listener received shutdown signal");
                break;
            }
        }
    }
}

async fn retransmit(
    client: Arc<ControlClient>,
    mut requests: mpsc::UnboundedReceiver<RecoveryRequest>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else { break };
                send_cycle(&client, &request).await;
            }
            _ = shutdown.recv() => {
                tracing::debug!("Retransmission task received shutdown signal");
                break;
            }
        }
    }
}

/// Send the batches of one recovery cycle, stopping once the transfer no
/// longer needs them.
async fn send_cycle(client: &ControlClient, request: &RecoveryRequest) {
    for batch in &request.batches {
        if !request.is_current() {
            tracing::debug!("Dropping stale retransmission request for {}", batch.id);
            return;
        }
        if let Err(e) = client.request_parts(&batch.id, batch.indices.clone()).await {
            tracing::warn!("Retransmission request for {} failed: {}", batch.id, e);
        }
    }
}
