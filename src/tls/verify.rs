//! Server certificate verification policies for the client

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the client decides to trust the server certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerVerification {
    /// Accept a server whose certificate is in the trust bundle, or chains
    /// to it. The server hostname is NOT checked.
    #[default]
    TrustPool,
    /// Full WebPKI chain and hostname validation against the trust bundle
    Strict,
}

/// Build the root store from the trust bundle
pub(crate) fn root_store(trusted: &[CertificateDer<'static>]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(trusted.iter().cloned());
    if ignored > 0 {
        tracing::warn!("Ignored {} unparsable certificate(s) in trust bundle", ignored);
    }
    if added == 0 {
        return Err(Error::Config("trust bundle contains no usable certificates".into()));
    }
    Ok(roots)
}

/// Trust-pool verifier.
///
/// An end-entity certificate that is byte-identical to a bundled certificate
/// is accepted outright; otherwise the WebPKI chain is checked and only a
/// hostname mismatch is forgiven. Handshake signatures are always verified.
#[derive(Debug)]
pub(crate) struct TrustPoolVerifier {
    pinned: Vec<CertificateDer<'static>>,
    inner: Arc<WebPkiServerVerifier>,
}

impl TrustPoolVerifier {
    pub(crate) fn new(
        trusted: &[CertificateDer<'static>],
        provider: Arc<CryptoProvider>,
    ) -> Result<Self> {
        let roots = Arc::new(root_store(trusted)?);
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(|e| Error::Config(format!("failed to build certificate verifier: {}", e)))?;

        Ok(Self {
            pinned: trusted.to_vec(),
            inner,
        })
    }
}

impl ServerCertVerifier for TrustPoolVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if self.pinned.iter().any(|c| c.as_ref() == end_entity.as_ref()) {
            return Ok(ServerCertVerified::assertion());
        }

        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => {
                tracing::debug!("Accepting server certificate despite name mismatch for {:?}", server_name);
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
