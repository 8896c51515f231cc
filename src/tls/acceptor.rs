//! Server-side channel establishment
//!
//! `TlsListener` binds once and hands out one `SecureChannel` per client that
//! completes the TLS 1.3 handshake.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsStream;

use super::{KeyExchangeProfile, SecureChannel, TlsIdentity};
use crate::error::{Error, Result};

/// TLS 1.3 acceptor restricted to the profile's key-exchange groups
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
}

impl TlsAcceptor {
    pub fn new(identity: TlsIdentity, profile: &KeyExchangeProfile) -> Result<Self> {
        let provider = Arc::new(profile.crypto_provider());

        let config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_no_client_auth()
            .with_single_cert(identity.cert_chain, identity.key)?;

        Ok(Self {
            inner: tokio_rustls::TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// Run the server handshake on an accepted TCP stream
    pub async fn accept(&self, stream: TcpStream) -> io::Result<SecureChannel> {
        let peer_addr = stream.peer_addr()?;
        let stream = self.inner.accept(stream).await?;
        Ok(SecureChannel::new(TlsStream::Server(stream), peer_addr))
    }
}

/// Listening TLS endpoint
pub struct TlsListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    local_addr: SocketAddr,
}

impl TlsListener {
    /// Load the certificate/key pair and bind.
    ///
    /// Any failure, including unreadable certificate files, is `BindFailed`.
    pub async fn listen(
        address: &str,
        cert_path: &Path,
        key_path: &Path,
        profile: &KeyExchangeProfile,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let identity = TlsIdentity::load(cert_path, key_path).map_err(|e| bind_failed(address, e))?;
        Self::bind(address, identity, profile, handshake_timeout).await
    }

    /// Bind with an already loaded identity
    pub async fn bind(
        address: &str,
        identity: TlsIdentity,
        profile: &KeyExchangeProfile,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let acceptor = TlsAcceptor::new(identity, profile).map_err(|e| bind_failed(address, e))?;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| bind_failed(address, e))?;
        let local_addr = listener.local_addr().map_err(|e| bind_failed(address, e))?;

        tracing::info!("Tunnel server listening on {} (TLS 1.3)", local_addr);

        Ok(Self {
            listener,
            acceptor,
            handshake_timeout,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next client to complete the handshake.
    ///
    /// Errors only concern this one attempt; the listener stays usable.
    pub async fn accept(&self) -> Result<SecureChannel> {
        self.accept_connection().await?.handshake().await
    }

    /// Wait for the next TCP connection without running the handshake, so
    /// the caller can handshake off the accept loop.
    pub async fn accept_connection(&self) -> Result<PendingHandshake> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::Accept(format!("TCP accept: {}", e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::Accept(format!("{}: {}", addr, e)))?;

        Ok(PendingHandshake {
            stream,
            addr,
            acceptor: self.acceptor.clone(),
            handshake_timeout: self.handshake_timeout,
        })
    }
}

/// An accepted TCP connection whose TLS handshake has not run yet
pub struct PendingHandshake {
    stream: TcpStream,
    addr: SocketAddr,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
}

impl PendingHandshake {
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Complete the server handshake, bounded by the listener's timeout
    pub async fn handshake(self) -> Result<SecureChannel> {
        let addr = self.addr;
        match timeout(self.handshake_timeout, self.acceptor.accept(self.stream)).await {
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(e)) => Err(Error::Accept(format!("TLS handshake with {}: {}", addr, e))),
            Err(_) => Err(Error::Accept(format!(
                "TLS handshake with {} timed out after {:?}",
                addr, self.handshake_timeout
            ))),
        }
    }
}

fn bind_failed(address: &str, reason: impl ToString) -> Error {
    Error::BindFailed {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}
