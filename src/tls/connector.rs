//! Client-side channel establishment with bounded retry

use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsStream;

use super::verify::{root_store, ServerVerification, TrustPoolVerifier};
use super::{KeyExchangeProfile, SecureChannel};
use crate::error::{Error, Result};

/// Connection retry policy: fixed backoff, no growth, no jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts
    pub attempts: u32,
    /// Sleep between two attempts
    pub backoff: Duration,
    /// Upper bound for TCP connect plus TLS handshake of one attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

/// TLS 1.3 client connector
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Build a connector trusting the given bundle and offering the profile's groups
    pub fn new(
        trusted: &[CertificateDer<'static>],
        profile: &KeyExchangeProfile,
        verification: ServerVerification,
    ) -> Result<Self> {
        let provider = Arc::new(profile.crypto_provider());

        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?;

        let config = match verification {
            ServerVerification::Strict => builder
                .with_root_certificates(root_store(trusted)?)
                .with_no_client_auth(),
            ServerVerification::TrustPool => {
                tracing::warn!(
                    "Server hostname verification disabled (trust-pool mode); \
                     set client.server_verification = \"strict\" to enforce it"
                );
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(TrustPoolVerifier::new(
                        trusted, provider,
                    )?))
                    .with_no_client_auth()
            }
        };

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }

    /// Connect to `address` (host:port), retrying per `policy`.
    ///
    /// Returns the first channel that completes the handshake. After the last
    /// failed attempt the error carries the final transport error.
    pub async fn connect(&self, address: &str, policy: &RetryPolicy) -> Result<SecureChannel> {
        let server_name = server_name_for(address)?;
        let mut last_error = None;

        for attempt in 1..=policy.attempts {
            tracing::info!(
                "Connecting to tunnel server {} (attempt {}/{})",
                address,
                attempt,
                policy.attempts
            );

            match self.connect_once(address, server_name.clone(), policy.attempt_timeout).await {
                Ok(channel) => {
                    tracing::info!("Secure channel established with {}", channel.describe());
                    return Ok(channel);
                }
                Err(e) => {
                    tracing::warn!("Connection attempt {} to {} failed: {}", attempt, address, e);
                    last_error = Some(e);
                }
            }

            if attempt < policy.attempts {
                tokio::time::sleep(policy.backoff).await;
            }
        }

        let source = last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no connection attempts configured")
        });
        tracing::error!(
            "Giving up on {} after {} attempt(s): {}",
            address,
            policy.attempts,
            source
        );
        Err(Error::ConnectionFailed {
            address: address.to_string(),
            attempts: policy.attempts,
            source,
        })
    }

    async fn connect_once(
        &self,
        address: &str,
        server_name: ServerName<'static>,
        attempt_timeout: Duration,
    ) -> io::Result<SecureChannel> {
        let handshake = async {
            let tcp = TcpStream::connect(address).await?;
            tcp.set_nodelay(true)?;
            let peer_addr = tcp.peer_addr()?;
            let stream = self.inner.connect(server_name, tcp).await?;
            Ok(SecureChannel::new(TlsStream::Client(stream), peer_addr))
        };

        match timeout(attempt_timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no handshake within {:?}", attempt_timeout),
            )),
        }
    }
}

/// Derive the TLS server name from a host:port address
fn server_name_for(address: &str) -> Result<ServerName<'static>> {
    let host = match address.rsplit_once(':') {
        Some((host, _port)) => host,
        None => address,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(host.to_string())
        .map_err(|e| Error::Config(format!("invalid server address '{}': {}", address, e)))
}
