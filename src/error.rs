//! WolfTun Error Types

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for WolfTun operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfTun error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // TLS errors
    #[error("Certificate error in {path:?}: {reason}")]
    Certificate { path: PathBuf, reason: String },

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    // Channel establishment errors
    #[error("Connection failed to {address} after {attempts} attempt(s): {source}")]
    ConnectionFailed {
        address: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to listen on {address}: {reason}")]
    BindFailed { address: String, reason: String },

    #[error("Accept failed: {0}")]
    Accept(String),

    // Virtual interface errors
    #[error("Virtual interface error: {0}")]
    Interface(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn certificate(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Certificate {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error must terminate the process.
    ///
    /// Only per-connection accept failures are contained; everything else
    /// happens during startup or ends the single client session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Accept(_))
    }
}
