//! Key-exchange profile selection
//!
//! Maps the post-quantum flag to the ordered list of TLS 1.3 key-exchange
//! groups offered (client) or accepted (server) during the handshake.

use std::fmt;

use rustls::crypto::aws_lc_rs::{self, kx_group};
use rustls::crypto::{CryptoProvider, SupportedKxGroup};
use rustls::NamedGroup;

/// A key-exchange group understood by the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchange {
    /// Hybrid X25519 + ML-KEM-768
    X25519MlKem768,
    /// Classical X25519 ECDH
    X25519,
}

impl KeyExchange {
    /// IANA group identifier
    pub fn named_group(self) -> NamedGroup {
        match self {
            KeyExchange::X25519MlKem768 => NamedGroup::X25519MLKEM768,
            KeyExchange::X25519 => NamedGroup::X25519,
        }
    }

    /// Map a negotiated group back to a known key exchange
    pub fn from_named_group(group: NamedGroup) -> Option<Self> {
        match group {
            NamedGroup::X25519MLKEM768 => Some(KeyExchange::X25519MlKem768),
            NamedGroup::X25519 => Some(KeyExchange::X25519),
            _ => None,
        }
    }

    /// Whether this group includes a post-quantum component
    pub fn is_post_quantum(self) -> bool {
        matches!(self, KeyExchange::X25519MlKem768)
    }

    fn kx_group(self) -> &'static dyn SupportedKxGroup {
        match self {
            KeyExchange::X25519MlKem768 => kx_group::X25519MLKEM768,
            KeyExchange::X25519 => kx_group::X25519,
        }
    }
}

impl fmt::Display for KeyExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyExchange::X25519MlKem768 => write!(f, "X25519MLKEM768"),
            KeyExchange::X25519 => write!(f, "X25519"),
        }
    }
}

/// Ordered key-exchange preference list, highest preference first.
///
/// Never empty, and always ends with classical X25519.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchangeProfile {
    groups: Vec<KeyExchange>,
}

impl KeyExchangeProfile {
    /// Select the profile for the given mode
    pub fn select(post_quantum: bool) -> Self {
        let groups = if post_quantum {
            tracing::info!("Key exchange: post-quantum hybrid mode (X25519MLKEM768, X25519 fallback)");
            vec![KeyExchange::X25519MlKem768, KeyExchange::X25519]
        } else {
            tracing::info!("Key exchange: baseline mode (X25519 only)");
            vec![KeyExchange::X25519]
        };
        Self { groups }
    }

    pub fn groups(&self) -> &[KeyExchange] {
        &self.groups
    }

    /// The group offered first
    pub fn preferred(&self) -> KeyExchange {
        self.groups[0]
    }

    pub fn is_post_quantum(&self) -> bool {
        self.preferred().is_post_quantum()
    }

    /// Build an aws-lc-rs crypto provider restricted to this profile's groups
    pub(crate) fn crypto_provider(&self) -> CryptoProvider {
        CryptoProvider {
            kx_groups: self.groups.iter().map(|g| g.kx_group()).collect(),
            ..aws_lc_rs::default_provider()
        }
    }
}
