//! WolfTun - Encrypted Point-to-Point Tunnel
//!
//! Relays raw IP packets between a local TUN interface and a remote peer
//! over a TLS 1.3 channel, optionally negotiating the X25519MLKEM768
//! post-quantum hybrid key exchange.
//!
//! # Architecture
//!
//! A client dials the server once, with bounded retry, and relays until
//! either side goes away. The server accepts any number of clients and
//! relays each one through a single shared TUN device.
//!
//! # Features
//!
//! - TLS 1.3 only, rustls with the aws-lc-rs provider
//! - Optional post-quantum hybrid key exchange with classical fallback
//! - Two cancellable pumps per session, one per direction
//! - Shared server device behind a single reader and writer (the hub)
//! - Forwarding, NAT and client routing set up and torn down automatically

pub mod config;
pub mod error;
pub mod netconf;
pub mod relay;
pub mod session;
pub mod tls;
pub mod tun;

pub use config::TunnelConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::TunnelConfig;
    pub use crate::error::{Error, Result};
    pub use crate::relay::{relay, RelayOutcome, VirtualInterface};
    pub use crate::session::{TunnelClient, TunnelServer};
    pub use crate::tls::{KeyExchangeProfile, SecureChannel, ServerVerification};
}
