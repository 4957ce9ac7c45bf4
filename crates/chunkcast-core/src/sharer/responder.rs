//! Control responder.
//!
//! Answers every control datagram with exactly one response. For `GET` and
//! `PARTS` the acknowledgement is sent first and the broadcast then runs on
//! its own task, so a slow or failing broadcast never holds up the next
//! request.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, RwLock};

use super::broadcaster::Broadcaster;
use crate::catalog::{FileCatalog, SharedFile};
use crate::error::{Error, Result};
use crate::protocol::{ErrorReason, FileId, Request, Response, ACK_RESENDING, ACK_SENDING};
use crate::transport::send_datagram;

/// Broadcast work accepted by a request.
#[derive(Debug, Clone)]
pub struct BroadcastJob {
    /// File to broadcast
    pub file: SharedFile,
    /// Pieces to send, ascending
    pub indices: Vec<u32>,
}

/// Dispatches control requests against the catalog.
#[derive(Debug)]
pub struct ControlResponder {
    socket: Arc<UdpSocket>,
    catalog: Arc<RwLock<FileCatalog>>,
    broadcaster: Broadcaster,
}

impl ControlResponder {
    /// Create a responder.
    #[must_use]
    pub const fn new(
        socket: Arc<UdpSocket>,
        catalog: Arc<RwLock<FileCatalog>>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            socket,
            catalog,
            broadcaster,
        }
    }

    /// Serve requests until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut buf = vec![0u8; crate::MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => self.handle(&buf[..len], from).await,
                        Err(e) => tracing::warn!("Control socket receive error: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("ControlResponder received shutdown signal");
                    break;
                }
            }
        }
    }

    async fn handle(&self, datagram: &[u8], from: SocketAddr) {
        let (response, job) = self.dispatch(datagram).await;

        if let Err(e) = send_datagram(&self.socket, &response.encode(), from).await {
            tracing::warn!("{}", e);
            return;
        }

        if let Some(job) = job {
            let broadcaster = self.broadcaster.clone();
            tokio::spawn(async move {
                broadcaster.broadcast(&job.file, job.indices).await;
            });
        }
    }

    /// Decide the response to a request and the broadcast it triggers.
    pub async fn dispatch(&self, datagram: &[u8]) -> (Response, Option<BroadcastJob>) {
        let request = match Request::decode(datagram) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Rejecting control request: {}", e);
                return (Response::Refused(ErrorReason::from_error(&e)), None);
            }
        };
        tracing::debug!("Control request: {:?}", request);

        match self.answer(request).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::debug!("Refusing control request: {}", e);
                (Response::Refused(ErrorReason::from_error(&e)), None)
            }
        }
    }

    async fn answer(&self, request: Request) -> Result<(Response, Option<BroadcastJob>)> {
        match request {
            Request::List => {
                let files = self.catalog.read().await.list();
                Ok((Response::listing(&files)?, None))
            }
            Request::Get(id) => {
                let file = self.lookup(&id).await?;
                let indices = (0..file.descriptor.parts).collect();
                Ok((
                    Response::ack(ACK_SENDING),
                    Some(BroadcastJob { file, indices }),
                ))
            }
            Request::Parts { id, indices } => {
                let file = self.lookup(&id).await?;
                let parts = file.descriptor.parts;
                let indices: BTreeSet<u32> = indices.into_iter().filter(|&i| i < parts).collect();
                Ok((
                    Response::ack(ACK_RESENDING),
                    Some(BroadcastJob {
                        file,
                        indices: indices.into_iter().collect(),
                    }),
                ))
            }
        }
    }

    async fn lookup(&self, id: &FileId) -> Result<SharedFile> {
        self.catalog
            .read()
            .await
            .find(id)
            .cloned()
            .ok_or_else(|| Error::UnknownFile(id.to_string()))
    }
}
