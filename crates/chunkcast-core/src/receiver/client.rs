//! Control channel client.
//!
//! Responses on the control channel carry no sequence number, so the client
//! keeps exactly one request outstanding at a time. Before each request it
//! discards any datagram still queued on the socket, which is how a late
//! reply to a timed-out request is kept from answering the next one.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::catalog::FileDescriptor;
use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::protocol::{decode_listing, FileId, Request, Response};
use crate::transport::send_datagram;

/// Sends control requests to one sharer.
#[derive(Debug)]
pub struct ControlClient {
    socket: Mutex<UdpSocket>,
    server: SocketAddr,
    timeout: Duration,
}

impl ControlClient {
    /// Create a client talking to `server` over `socket`.
    #[must_use]
    pub fn new(socket: UdpSocket, server: SocketAddr, timeout: Duration) -> Self {
        Self {
            socket: Mutex::new(socket),
            server,
            timeout,
        }
    }

    /// Create a client on an ephemeral socket for the configured sharer.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn connect(config: &NetworkConfig) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let server = SocketAddr::V4(SocketAddrV4::new(
            config.server_address,
            config.control_port,
        ));
        Ok(Self::new(socket, server, config.request_timeout))
    }

    /// Fetch the sharer's catalog listing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no answer arrives in time, or the error
    /// matching a refusal.
    pub async fn list(&self) -> Result<Vec<FileDescriptor>> {
        let payload = self.exchange(&Request::List).await?.into_payload(None)?;
        decode_listing(&payload)
    }

    /// Ask the sharer to broadcast a whole file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFile`] if the sharer does not know `id`, or
    /// [`Error::Timeout`] if no answer arrives in time.
    pub async fn get(&self, id: &FileId) -> Result<()> {
        let ack = self.exchange(&Request::Get(*id)).await?.into_payload(Some(id))?;
        tracing::debug!("GET {} acknowledged: {}", id, String::from_utf8_lossy(&ack));
        Ok(())
    }

    /// Ask the sharer to broadcast some pieces again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFile`] if the sharer does not know `id`, or
    /// [`Error::Timeout`] if no answer arrives in time.
    pub async fn request_parts(&self, id: &FileId, indices: Vec<u32>) -> Result<()> {
        let count = indices.len();
        let request = Request::Parts { id: *id, indices };
        self.exchange(&request).await?.into_payload(Some(id))?;
        tracing::debug!("PARTS {} acknowledged for {} pieces", id, count);
        Ok(())
    }

    /// Send one request and wait for its single response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NetworkSendFailure`] if the request cannot be sent,
    /// or [`Error::Timeout`] if no response arrives in time.
    pub async fn exchange(&self, request: &Request) -> Result<Response> {
        let socket = self.socket.lock().await;
        let mut buf = vec![0u8; crate::MAX_DATAGRAM_SIZE];

        loop {
            match socket.try_recv_from(&mut buf) {
                Ok((len, from)) => {
                    tracing::debug!("Discarding stale {} byte response from {}", len, from);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!("Ignoring control socket error while draining: {}", e);
                    break;
                }
            }
        }

        send_datagram(&socket, &request.encode(), self.server).await?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf))
                .await
                .map_err(|_| {
                    Error::Timeout(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
                })?;

            match received {
                Ok((len, from)) if from.port() == self.server.port() => {
                    return Ok(Response::decode(&buf[..len]));
                }
                Ok((_, from)) => {
                    tracing::debug!("Ignoring control datagram from {}", from);
                }
                Err(e) => {
                    tracing::debug!("Control socket receive error: {}", e);
                }
            }
        }
    }

    /// Sharer control address.
    #[must_use]
    pub const fn server(&self) -> SocketAddr {
        self.server
    }
}
