//! Owned UDP sockets for each role.
//!
//! A [`SharerTransport`] listens on the control port and sends data frames to
//! the broadcast address. A [`ReceiverTransport`] sends control requests to
//! the sharer and listens on the data port. Dropping a transport (and every
//! handle cloned out of it) closes its sockets.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};

/// Bind a UDP socket the same way on every platform.
fn bind_udp(port: u16, broadcast: bool) -> Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    if broadcast {
        socket.set_broadcast(true)?;
    }
    socket.set_reuse_address(true)?;

    #[cfg(target_os = "macos")]
    socket.set_reuse_port(true)?;

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into())?;

    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// Send one datagram, mapping failures to [`Error::NetworkSendFailure`].
///
/// # Errors
///
/// Returns an error if the socket refuses the datagram.
pub async fn send_datagram(socket: &UdpSocket, buf: &[u8], addr: SocketAddr) -> Result<()> {
    socket
        .send_to(buf, addr)
        .await
        .map(|_| ())
        .map_err(|source| Error::NetworkSendFailure { addr, source })
}

/// Sends data frames to the broadcast target.
#[derive(Debug, Clone)]
pub struct DataSender {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl DataSender {
    /// Send one encoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NetworkSendFailure`] if the send fails.
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        send_datagram(&self.socket, frame, self.target).await
    }

    /// Address frames are sent to.
    #[must_use]
    pub const fn target(&self) -> SocketAddr {
        self.target
    }
}

/// Sockets owned by a sharer.
#[derive(Debug)]
pub struct SharerTransport {
    control: Arc<UdpSocket>,
    data: DataSender,
}

impl SharerTransport {
    /// Bind the control socket and the broadcast data socket.
    ///
    /// # Errors
    ///
    /// Returns an error if either socket cannot be created or bound.
    pub async fn bind(config: &NetworkConfig) -> Result<Self> {
        let control = bind_udp(config.control_port, false)?;
        let data = bind_udp(0, true)?;
        let target = SocketAddr::V4(SocketAddrV4::new(
            config.broadcast_address,
            config.data_port,
        ));

        tracing::debug!(
            "Sharer transport bound: control {:?}, data target {}",
            control.local_addr().ok(),
            target
        );

        Ok(Self {
            control: Arc::new(control),
            data: DataSender {
                socket: Arc::new(data),
                target,
            },
        })
    }

    /// Socket answering control requests.
    #[must_use]
    pub fn control(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.control)
    }

    /// Handle for sending data frames.
    #[must_use]
    pub fn data_sender(&self) -> DataSender {
        self.data.clone()
    }

    /// Local address of the control socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be queried.
    pub fn control_addr(&self) -> Result<SocketAddr> {
        Ok(self.control.local_addr()?)
    }
}

/// Sockets owned by a receiver.
#[derive(Debug)]
pub struct ReceiverTransport {
    /// Ephemeral socket for control exchanges
    pub control: UdpSocket,
    /// Socket bound to the data port
    pub data: UdpSocket,
    /// Sharer control address
    pub server: SocketAddr,
}

impl ReceiverTransport {
    /// Bind the control socket and the data listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if either socket cannot be created or bound.
    pub async fn bind(config: &NetworkConfig) -> Result<Self> {
        let control = bind_udp(0, false)?;
        let data = bind_udp(config.data_port, true)?;
        let server = SocketAddr::V4(SocketAddrV4::new(
            config.server_address,
            config.control_port,
        ));

        tracing::debug!(
            "Receiver transport bound: data {:?}, sharer {}",
            data.local_addr().ok(),
            server
        );

        Ok(Self {
            control,
            data,
            server,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config(control_port: u16, data_port: u16) -> NetworkConfig {
        NetworkConfig {
            control_port,
            data_port,
            broadcast_address: Ipv4Addr::LOCALHOST,
            server_address: Ipv4Addr::LOCALHOST,
            ..NetworkConfig::default()
        }
    }

    #[tokio::test]
    async fn test_frames_reach_receiver_data_socket() {
        let config = loopback_config(47_110, 47_111);
        let sharer = SharerTransport::bind(&config).await.expect("bind sharer");
        let receiver = ReceiverTransport::bind(&config).await.expect("bind receiver");

        assert_eq!(receiver.server, "127.0.0.1:47110".parse().unwrap());
        sharer.data_sender().send(b"hello").await.expect("send");

        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            receiver.data.recv_from(&mut buf),
        )
        .await
        .expect("frame arrives")
        .expect("recv");
        assert_eq!(&buf[..len], b"hello");
    }

    #[tokio::test]
    async fn test_control_addr_uses_configured_port() {
        let config = loopback_config(47_120, 47_121);
        let sharer = SharerTransport::bind(&config).await.expect("bind sharer");
        assert_eq!(sharer.control_addr().unwrap().port(), 47_120);
    }
}
