//! Session lifecycle
//!
//! A session is one secure channel bound to one interface endpoint for the
//! lifetime of the relay. The client runs exactly one; the server runs one
//! per accepted client.

pub mod client;
pub mod server;

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::relay::{relay, RelayOutcome, VirtualInterface};

pub use client::TunnelClient;
pub use server::{serve, TunnelServer};

/// Relay one session to completion and log how it ended
pub async fn run_session<S, I>(
    channel: S,
    interface: I,
    peer: SocketAddr,
    mtu: usize,
    cancel: CancellationToken,
) -> RelayOutcome
where
    S: AsyncRead + AsyncWrite + Send,
    I: VirtualInterface,
{
    tracing::info!("Session with {} started", peer);

    let outcome = relay(channel, interface, mtu, cancel).await;

    match outcome.first_failure() {
        Some((direction, failure)) => {
            tracing::info!("Session with {} ended: {} {}", peer, direction, failure)
        }
        None => tracing::info!("Session with {} cancelled", peer),
    }
    tracing::debug!("Session with {} outcome: {}", peer, outcome);
    outcome
}
