//! Established secure channel

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use rustls::{NamedGroup, ProtocolVersion};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;

use super::KeyExchange;

/// An authenticated, encrypted TLS 1.3 stream to one peer.
///
/// Owned by exactly one session; dropping it closes the connection.
pub struct SecureChannel {
    stream: TlsStream<TcpStream>,
    peer_addr: SocketAddr,
    protocol_version: Option<ProtocolVersion>,
    key_exchange_group: Option<NamedGroup>,
}

impl SecureChannel {
    pub(crate) fn new(stream: TlsStream<TcpStream>, peer_addr: SocketAddr) -> Self {
        let (_, conn) = stream.get_ref();
        let protocol_version = conn.protocol_version();
        let key_exchange_group = conn.negotiated_key_exchange_group().map(|g| g.name());

        Self {
            stream,
            peer_addr,
            protocol_version,
            key_exchange_group,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.protocol_version
    }

    /// Negotiated key-exchange group as reported by rustls
    pub fn key_exchange_group(&self) -> Option<NamedGroup> {
        self.key_exchange_group
    }

    /// Negotiated key exchange, if it is one the tunnel knows about
    pub fn key_exchange(&self) -> Option<KeyExchange> {
        self.key_exchange_group.and_then(KeyExchange::from_named_group)
    }

    /// Short human-readable description for logs
    pub fn describe(&self) -> String {
        let kx = match (self.key_exchange(), self.key_exchange_group) {
            (Some(kx), _) => kx.to_string(),
            (None, Some(group)) => format!("{:?}", group),
            (None, None) => "unknown".to_string(),
        };
        format!(
            "{} ({:?}, key exchange {})",
            self.peer_addr,
            self.protocol_version.unwrap_or(ProtocolVersion::Unknown(0)),
            kx
        )
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("peer_addr", &self.peer_addr)
            .field("protocol_version", &self.protocol_version)
            .field("key_exchange_group", &self.key_exchange_group)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for SecureChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SecureChannel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
