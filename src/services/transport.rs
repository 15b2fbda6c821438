//! tokio transports: UDP for Z21, serial for CBUS CAN-USB adapters.
//!
//! Both are plain byte pipes implementing [`AsyncLinkTransport`]. `recv` is
//! cancel-safe on both, so the link runner can select on it. Dropping a
//! transport closes the socket or port.

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::error::TransportError;
use crate::traits::AsyncLinkTransport;

// ============================================================================
// UDP
// ============================================================================

/// Connected UDP socket to one command station.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    remote: std::net::SocketAddr,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to `host:port`.
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;
        socket
            .connect((host, port))
            .await
            .map_err(|e| TransportError::Open(format!("{host}:{port}: {e}")))?;
        let remote = socket
            .peer_addr()
            .map_err(|e| TransportError::Open(e.to_string()))?;
        debug!("udp socket {:?} -> {}", socket.local_addr().ok(), remote);
        Ok(Self { socket, remote })
    }

    /// Remote address.
    pub fn remote(&self) -> std::net::SocketAddr {
        self.remote
    }
}

impl AsyncLinkTransport for UdpTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.socket.send(bytes).await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            let n = self.socket.recv(buf).await?;
            if n > 0 {
                return Ok(n);
            }
        }
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.remote)
    }
}

// ============================================================================
// Serial
// ============================================================================

/// Serial port at 8N1 without flow control.
pub struct SerialTransport {
    port: SerialStream,
    path: String,
}

impl SerialTransport {
    /// Open `path` at `baud`.
    pub fn open(path: &str, baud: u32) -> Result<Self, TransportError> {
        let port = tokio_serial::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| TransportError::Open(format!("{path}: {e}")))?;
        Ok(Self {
            port,
            path: path.to_string(),
        })
    }
}

impl core::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .finish()
    }
}

impl AsyncLinkTransport for SerialTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes).await?;
        self.port.flush().await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf).await? {
            0 => Err(TransportError::Closed),
            n => Ok(n),
        }
    }

    fn describe(&self) -> String {
        format!("serial://{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_round_trip_with_local_peer() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = peer.local_addr().unwrap().port();

        let mut link = UdpTransport::connect("127.0.0.1", port).await.unwrap();
        assert_eq!(link.describe(), format!("udp://127.0.0.1:{port}"));

        link.send(&[0x04, 0x00, 0x10, 0x00]).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x04, 0x00, 0x10, 0x00]);

        peer.send_to(&[0x08, 0x00, 0x10, 0x00, 1, 0, 0, 0], from)
            .await
            .unwrap();
        let n = link.recv(&mut buf).await.unwrap();
        assert_eq!(n, 8);
    }

    #[tokio::test]
    async fn test_serial_open_missing_device() {
        let err = SerialTransport::open("/dev/does-not-exist-cbus", 115_200).unwrap_err();
        assert!(matches!(err, TransportError::Open(_)));
    }
}
