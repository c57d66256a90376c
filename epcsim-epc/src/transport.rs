//! UDP transport for EPC envelopes
//!
//! Carries encoded [`EpcMessageContainer`]s between processes when the
//! signaling subnet is a real network rather than the in-process
//! simulation.

use std::net::SocketAddr;

use epcsim_common::{Error, Result};
use tokio::net::UdpSocket;
use tracing::trace;

use crate::codec;
use crate::protocol::EpcMessageContainer;

/// Largest datagram a UDP socket can receive.
const RECV_BUFFER_SIZE: usize = 65535;

/// Async UDP socket carrying one EPC envelope per datagram.
///
/// # Example
///
/// ```ignore
/// let transport = UdpEpcTransport::bind("127.0.0.1:0".parse()?).await?;
/// transport.send_container(&container, peer).await?;
/// let (container, src) = transport.recv_container().await?;
/// ```
pub struct UdpEpcTransport {
    socket: UdpSocket,
}

impl UdpEpcTransport {
    /// Binds a UDP socket. Use port 0 for automatic port assignment.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    /// Encodes and sends one envelope.
    pub async fn send_container(&self, container: &EpcMessageContainer, addr: SocketAddr) -> Result<()> {
        let data = codec::encode(container);
        self.send_raw(&data, addr).await
    }

    /// Sends already encoded bytes.
    pub async fn send_raw(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        let sent = self.socket.send_to(data, addr).await?;
        if sent != data.len() {
            return Err(Error::Codec(format!(
                "short send to {addr}: {sent} of {} bytes",
                data.len()
            )));
        }
        trace!("EPC datagram {} bytes to {}", sent, addr);
        Ok(())
    }

    /// Receives and decodes one envelope.
    ///
    /// A datagram that fails to decode is returned as an error; the socket
    /// stays usable.
    pub async fn recv_container(&self) -> Result<(EpcMessageContainer, SocketAddr)> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let (len, addr) = self.socket.recv_from(&mut buf).await?;
        trace!("EPC datagram {} bytes from {}", len, addr);
        let container = codec::decode(&buf[..len])?;
        Ok((container, addr))
    }

    /// Returns the local address this socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}
