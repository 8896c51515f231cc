//! WolfTun Configuration
//!
//! One TOML file covers both roles; every field has a default so the file
//! itself is optional.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::tls::{RetryPolicy, ServerVerification};

/// Main WolfTun configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Virtual interface settings
    #[serde(default)]
    pub interface: InterfaceConfig,

    /// TLS settings shared by both roles
    #[serde(default)]
    pub tls: TlsConfig,

    /// Client role
    #[serde(default)]
    pub client: ClientConfig,

    /// Server role
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Virtual interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// TUN device name
    #[serde(default = "default_interface_name")]
    pub name: String,

    /// Prefix length of the tunnel subnet
    #[serde(default = "default_prefix_len")]
    pub prefix_len: u8,

    /// Interface MTU, also the relay buffer size
    #[serde(default = "default_mtu")]
    pub mtu: u16,
}

/// TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Offer the X25519MLKEM768 hybrid ahead of X25519
    #[serde(default)]
    pub post_quantum: bool,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Tunnel server (host:port)
    #[serde(default = "default_server_address")]
    pub server_address: String,

    /// PEM bundle the server certificate must appear in or chain to
    #[serde(default = "default_cert_file")]
    pub trust_bundle: PathBuf,

    /// Server certificate verification mode
    #[serde(default)]
    pub server_verification: ServerVerification,

    /// Total connection attempts
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Sleep between attempts in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Per-attempt TCP connect + handshake timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Client address inside the tunnel
    #[serde(default = "default_client_tunnel_address")]
    pub tunnel_address: String,

    /// Server address inside the tunnel, used as the route gateway
    #[serde(default = "default_server_tunnel_address")]
    pub gateway_address: String,

    /// Route all IPv4 traffic through the tunnel
    #[serde(default = "default_true")]
    pub redirect_default_route: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server certificate chain (PEM)
    #[serde(default = "default_cert_file")]
    pub cert_file: PathBuf,

    /// Server private key (PEM)
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,

    /// TLS handshake timeout in milliseconds
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Server address inside the tunnel
    #[serde(default = "default_server_tunnel_address")]
    pub tunnel_address: String,

    /// Frames buffered between the device and the sessions, per direction
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Masquerade tunnel traffic leaving the host
    #[serde(default = "default_true")]
    pub nat: bool,

    /// NAT egress interface (detected from the default route if unset)
    #[serde(default)]
    pub egress_interface: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_interface_name() -> String {
    "tun0".to_string()
}

fn default_prefix_len() -> u8 {
    24
}

fn default_mtu() -> u16 {
    1500
}

fn default_server_address() -> String {
    "vpn-server:443".to_string()
}

fn default_cert_file() -> PathBuf {
    PathBuf::from("/app/certs/server.crt")
}

fn default_key_file() -> PathBuf {
    PathBuf::from("/app/certs/server.key")
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_client_tunnel_address() -> String {
    "10.0.0.2".to_string()
}

fn default_server_tunnel_address() -> String {
    "10.0.0.1".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:443".to_string()
}

fn default_queue_depth() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: default_interface_name(),
            prefix_len: default_prefix_len(),
            mtu: default_mtu(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            trust_bundle: default_cert_file(),
            server_verification: ServerVerification::default(),
            connect_attempts: default_connect_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            tunnel_address: default_client_tunnel_address(),
            gateway_address: default_server_tunnel_address(),
            redirect_default_route: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cert_file: default_cert_file(),
            key_file: default_key_file(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            tunnel_address: default_server_tunnel_address(),
            queue_depth: default_queue_depth(),
            nat: true,
            egress_interface: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Smallest MTU every IPv4 host must accept
const MIN_MTU: u16 = 576;

impl TunnelConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: TunnelConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        let iface = &self.interface;
        if iface.name.is_empty() || iface.name.len() > 15 {
            return Err(crate::Error::Config(
                "interface.name must be 1 to 15 characters".into(),
            ));
        }
        if !(1..=30).contains(&iface.prefix_len) {
            return Err(crate::Error::Config(
                "interface.prefix_len must be between 1 and 30".into(),
            ));
        }
        if iface.mtu < MIN_MTU {
            return Err(crate::Error::Config(format!(
                "interface.mtu must be at least {}",
                MIN_MTU
            )));
        }

        if self.client.server_address.is_empty() {
            return Err(crate::Error::Config("client.server_address cannot be empty".into()));
        }
        if self.client.connect_attempts == 0 {
            return Err(crate::Error::Config(
                "client.connect_attempts must be at least 1".into(),
            ));
        }
        if self.client.connect_timeout_ms == 0 {
            return Err(crate::Error::Config("client.connect_timeout_ms cannot be 0".into()));
        }
        parse_address("client.tunnel_address", &self.client.tunnel_address)?;
        parse_address("client.gateway_address", &self.client.gateway_address)?;

        if self.server.bind_address.is_empty() {
            return Err(crate::Error::Config("server.bind_address cannot be empty".into()));
        }
        if self.server.handshake_timeout_ms == 0 {
            return Err(crate::Error::Config("server.handshake_timeout_ms cannot be 0".into()));
        }
        if self.server.queue_depth == 0 {
            return Err(crate::Error::Config("server.queue_depth must be at least 1".into()));
        }
        parse_address("server.tunnel_address", &self.server.tunnel_address)?;

        if !matches!(
            self.logging.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(crate::Error::Config(format!(
                "logging.level '{}' is not one of trace, debug, info, warn, error",
                self.logging.level
            )));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "compact") {
            return Err(crate::Error::Config(format!(
                "logging.format '{}' is not one of pretty, compact",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Relay buffer size
    pub fn mtu(&self) -> usize {
        self.interface.mtu as usize
    }

    /// Client connection retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.client.connect_attempts,
            backoff: Duration::from_millis(self.client.retry_backoff_ms),
            attempt_timeout: Duration::from_millis(self.client.connect_timeout_ms),
        }
    }

    /// Get handshake timeout as Duration
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.server.handshake_timeout_ms)
    }

    /// Tunnel subnet in CIDR notation, derived from the server's tunnel address
    pub fn subnet_cidr(&self) -> crate::Result<String> {
        self.subnet_of("server.tunnel_address", &self.server.tunnel_address)
    }

    /// Tunnel subnet as seen by the client, derived from its gateway address
    pub fn client_subnet_cidr(&self) -> crate::Result<String> {
        self.subnet_of("client.gateway_address", &self.client.gateway_address)
    }

    fn subnet_of(&self, field: &str, address: &str) -> crate::Result<String> {
        let addr = parse_address(field, address)?;
        let host_bits = 32u32.saturating_sub(self.interface.prefix_len as u32);
        let mask = u32::MAX.checked_shl(host_bits).unwrap_or(0);
        let network = Ipv4Addr::from(u32::from(addr) & mask);
        Ok(format!("{}/{}", network, self.interface.prefix_len))
    }
}

fn parse_address(field: &str, value: &str) -> crate::Result<Ipv4Addr> {
    value.parse().map_err(|_| {
        crate::Error::Config(format!("{} '{}' is not an IPv4 address", field, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[interface]
name = "wt0"
mtu = 1400

[tls]
post_quantum = true

[client]
server_address = "tunnel.example.com:8443"
server_verification = "strict"
connect_attempts = 3

[server]
bind_address = "0.0.0.0:8443"
egress_interface = "eth1"
"#;

        let config = TunnelConfig::from_str(toml).unwrap();
        assert_eq!(config.interface.name, "wt0");
        assert_eq!(config.mtu(), 1400);
        assert!(config.tls.post_quantum);
        assert_eq!(config.client.server_verification, ServerVerification::Strict);
        assert_eq!(config.retry_policy().attempts, 3);
        assert_eq!(config.retry_policy().backoff, Duration::from_secs(2));
        assert_eq!(config.server.egress_interface.as_deref(), Some("eth1"));
        // Untouched fields keep their defaults
        assert_eq!(config.interface.prefix_len, 24);
        assert_eq!(config.server.queue_depth, 64);
    }

    #[test]
    fn test_empty_config_is_defaults() {
        let config = TunnelConfig::from_str("").unwrap();
        assert_eq!(config.interface.name, "tun0");
        assert_eq!(config.interface.mtu, 1500);
        assert!(!config.tls.post_quantum);
        assert_eq!(config.client.server_address, "vpn-server:443");
        assert_eq!(config.client.server_verification, ServerVerification::TrustPool);
        assert_eq!(config.client.tunnel_address, "10.0.0.2");
        assert_eq!(config.server.bind_address, "0.0.0.0:443");
        assert_eq!(config.server.key_file, PathBuf::from("/app/certs/server.key"));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.subnet_cidr().unwrap(), "10.0.0.0/24");
    }

    #[test]
    fn test_invalid_values_rejected() {
        for toml in [
            "[interface]\nmtu = 100",
            "[interface]\nprefix_len = 0",
            "[interface]\nname = \"a-very-long-interface\"",
            "[client]\nconnect_attempts = 0",
            "[client]\ntunnel_address = \"not-an-ip\"",
            "[server]\nqueue_depth = 0",
            "[logging]\nformat = \"xml\"",
        ] {
            let err = TunnelConfig::from_str(toml).unwrap_err();
            assert!(matches!(err, crate::Error::Config(_)), "{}: {}", toml, err);
        }

        let err = TunnelConfig::from_str("[client]\nserver_verification = \"none\"").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigParse(_)));
    }

    #[test]
    fn test_subnet_cidr() {
        let config = TunnelConfig::from_str(
            "[interface]\nprefix_len = 16\n[server]\ntunnel_address = \"172.20.5.1\"",
        )
        .unwrap();
        assert_eq!(config.subnet_cidr().unwrap(), "172.20.0.0/16");
    }

    #[test]
    fn test_subnet_cidr_prefix_edges() {
        let mut config = TunnelConfig::default();
        config.server.tunnel_address = "172.20.5.1".into();

        // Out of range for validate, but the derivation must not overflow
        config.interface.prefix_len = 0;
        assert_eq!(config.subnet_cidr().unwrap(), "0.0.0.0/0");

        config.interface.prefix_len = 32;
        assert_eq!(config.subnet_cidr().unwrap(), "172.20.5.1/32");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("wolftun.toml");

        let mut config = TunnelConfig::default();
        config.tls.post_quantum = true;
        config.server.nat = false;
        config.save(&path).unwrap();

        let loaded = TunnelConfig::load_or_default(&path).unwrap();
        assert!(loaded.tls.post_quantum);
        assert!(!loaded.server.nat);

        let missing = TunnelConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(missing.interface.name, "tun0");
    }
}
