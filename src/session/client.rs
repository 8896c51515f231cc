//! Tunnel client
//!
//! Connects once (with bounded retry), brings up the local TUN device and
//! relays until either side goes away. There is no reconnect.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::run_session;
use crate::config::TunnelConfig;
use crate::error::{Error, Result};
use crate::netconf::{self, ClientRouting};
use crate::relay::RelayOutcome;
use crate::tls::{load_certificates, KeyExchangeProfile, SecureChannel, TlsConnector};
use crate::tun::TunDevice;

pub struct TunnelClient {
    config: TunnelConfig,
}

impl TunnelClient {
    pub fn new(config: TunnelConfig) -> Self {
        Self { config }
    }

    /// Open the secure channel to the configured server
    pub async fn establish(&self) -> Result<SecureChannel> {
        let client = &self.config.client;
        let profile = KeyExchangeProfile::select(self.config.tls.post_quantum);
        let trusted = load_certificates(&client.trust_bundle)?;
        let connector = TlsConnector::new(&trusted, &profile, client.server_verification)?;

        connector
            .connect(&client.server_address, &self.config.retry_policy())
            .await
    }

    /// Run the client until the session ends or `shutdown` fires.
    ///
    /// With `handshake_only` the channel is verified and closed without
    /// touching any interface, and `None` is returned.
    pub async fn run(
        &self,
        handshake_only: bool,
        shutdown: CancellationToken,
    ) -> Result<Option<RelayOutcome>> {
        self.config.validate()?;
        let mut channel = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(Error::Cancelled),
            result = self.establish() => result?,
        };

        if handshake_only {
            tracing::info!(
                "Handshake-only mode: {} verified, closing",
                channel.describe()
            );
            if let Err(e) = channel.shutdown().await {
                tracing::debug!("TLS close_notify failed: {}", e);
            }
            return Ok(None);
        }

        let iface = &self.config.interface;
        let device = TunDevice::create(&iface.name)?;
        device.configure(&self.config.client.tunnel_address, iface).await?;

        let subnet = self.config.client_subnet_cidr()?;
        let routes = netconf::install_client_routes(&ClientRouting {
            interface: device.name(),
            subnet: &subnet,
            gateway: &self.config.client.gateway_address,
            server: Some(channel.peer_addr().ip()),
            redirect_default: self.config.client.redirect_default_route,
        })
        .await;

        let peer = channel.peer_addr();
        let outcome = run_session(
            channel,
            Arc::new(device),
            peer,
            self.config.mtu(),
            shutdown.child_token(),
        )
        .await;

        netconf::remove_client_routes(&routes).await;
        tracing::info!("Tunnel client stopped");
        Ok(Some(outcome))
    }
}
