//! PEM loading for certificates and private keys

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::{Error, Result};

/// Server certificate chain and its private key
#[derive(Debug)]
pub struct TlsIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl TlsIdentity {
    /// Load a certificate chain and private key from PEM files
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_chain = load_certificates(cert_path)?;
        let key = load_private_key(key_path)?;
        Ok(Self { cert_chain, key })
    }
}

/// Load every certificate from a PEM file.
///
/// Fails if the file holds no certificate at all.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| Error::certificate(path, e))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::certificate(path, e))?;

    if certs.is_empty() {
        return Err(Error::certificate(path, "no certificates found in file"));
    }

    tracing::debug!("Loaded {} certificate(s) from {:?}", certs.len(), path);
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| Error::certificate(path, e))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::certificate(path, e))?
        .ok_or_else(|| Error::certificate(path, "no private key found in file"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::testing::self_signed;

    #[test]
    fn test_load_identity_from_pem_files() {
        let dir = tempfile::tempdir().unwrap();
        let cert = self_signed(&["localhost"]);
        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");
        std::fs::write(&cert_path, &cert.cert_pem).unwrap();
        std::fs::write(&key_path, &cert.key_pem).unwrap();

        let identity = TlsIdentity::load(&cert_path, &key_path).unwrap();
        assert_eq!(identity.cert_chain.len(), 1);
        assert_eq!(identity.cert_chain[0], cert.cert_der);
    }

    #[test]
    fn test_missing_certificate_file() {
        let err = load_certificates(Path::new("/nonexistent/server.crt")).unwrap_err();
        assert!(matches!(err, Error::Certificate { .. }));
    }

    #[test]
    fn test_file_without_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.crt");
        std::fs::write(&path, "not a certificate\n").unwrap();

        let err = load_certificates(&path).unwrap_err();
        assert!(err.to_string().contains("no certificates"));
    }

    #[test]
    fn test_key_file_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let cert = self_signed(&["localhost"]);
        let path = dir.path().join("server.key");
        // A certificate is not a key
        std::fs::write(&path, &cert.cert_pem).unwrap();

        let err = load_private_key(&path).unwrap_err();
        assert!(err.to_string().contains("no private key"));
    }
}
