//! Tunnel server
//!
//! Binds one TLS listener and one TUN device, then accepts clients forever.
//! Each client gets its own task, its own hub port and a child of the root
//! cancellation token; a failing session never affects the others. Losing
//! the TUN device itself stops the server with `Error::Interface`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::run_session;
use crate::config::TunnelConfig;
use crate::error::{Error, Result};
use crate::netconf;
use crate::tls::{KeyExchangeProfile, TlsListener};
use crate::tun::{InterfaceHub, TunDevice};

pub struct TunnelServer {
    config: TunnelConfig,
}

impl TunnelServer {
    pub fn new(config: TunnelConfig) -> Self {
        Self { config }
    }

    /// Set everything up and serve until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.config.validate()?;
        let server = &self.config.server;
        let iface = &self.config.interface;
        let subnet = self.config.subnet_cidr()?;

        let profile = KeyExchangeProfile::select(self.config.tls.post_quantum);
        let listener = TlsListener::listen(
            &server.bind_address,
            &server.cert_file,
            &server.key_file,
            &profile,
            self.config.handshake_timeout(),
        )
        .await?;

        let device = TunDevice::create(&iface.name)?;
        device.configure(&server.tunnel_address, iface).await?;

        netconf::enable_forwarding().await;
        let nat = if server.nat {
            netconf::enable_nat(&subnet, server.egress_interface.as_deref()).await
        } else {
            None
        };

        let hub = InterfaceHub::start(
            Arc::new(device),
            self.config.mtu(),
            server.queue_depth,
            shutdown.child_token(),
        );

        let result = serve(&listener, &hub, self.config.mtu(), shutdown).await;

        hub.shutdown().await;
        if let Some(rule) = nat {
            netconf::disable_nat(&rule).await;
        }
        tracing::info!("Tunnel server stopped");
        result
    }
}

/// Accept clients and relay each one through the hub until `shutdown` fires.
///
/// Returns once every session task has stopped. Fails with
/// `Error::Interface` if the hub loses the device.
pub async fn serve(
    listener: &TlsListener,
    hub: &InterfaceHub,
    mtu: usize,
    shutdown: CancellationToken,
) -> Result<()> {
    let sessions = TaskTracker::new();
    let sessions_cancel = shutdown.child_token();
    let mut exit = Ok(());

    loop {
        let pending = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = hub.failed() => {
                exit = Err(Error::Interface("tunnel device can no longer be read".into()));
                break;
            }
            result = listener.accept_connection() => match result {
                Ok(pending) => pending,
                Err(e) => {
                    tracing::warn!("{}", e);
                    continue;
                }
            },
        };

        let port = hub.port();
        let cancel = sessions_cancel.child_token();
        sessions.spawn(async move {
            let peer = pending.peer_addr();
            let channel = tokio::select! {
                _ = cancel.cancelled() => return,
                result = pending.handshake() => match result {
                    Ok(channel) => channel,
                    Err(e) => {
                        tracing::warn!("Rejected client {}: {}", peer, e);
                        return;
                    }
                },
            };

            tracing::info!("Accepted tunnel client {}", channel.describe());
            run_session(channel, port, peer, mtu, cancel).await;
        });
    }

    sessions_cancel.cancel();
    sessions.close();
    if !sessions.is_empty() {
        tracing::info!("Stopping {} session(s)", sessions.len());
    }
    sessions.wait().await;
    exit
}
