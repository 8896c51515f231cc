//! Secure channel establishment
//!
//! TLS 1.3 only, over TCP, using rustls with the aws-lc-rs provider.
//!
//! - **Client**: [`TlsConnector`] dials with bounded retries and fixed backoff
//! - **Server**: [`TlsListener`] binds once and accepts one channel per client
//! - **Key exchange**: [`KeyExchangeProfile`] selects X25519, optionally
//!   preceded by the X25519MLKEM768 post-quantum hybrid

mod acceptor;
mod channel;
mod connector;
mod pem;
mod profile;
mod verify;

pub use acceptor::{PendingHandshake, TlsAcceptor, TlsListener};
pub use channel::SecureChannel;
pub use connector::{RetryPolicy, TlsConnector};
pub use pem::{load_certificates, load_private_key, TlsIdentity};
pub use profile::{KeyExchange, KeyExchangeProfile};
pub use verify::ServerVerification;

#[cfg(test)]
pub(crate) mod testing {
    use rcgen::{CertificateParams, KeyPair};
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

    use super::TlsIdentity;

    /// Throwaway self-signed certificate
    pub(crate) struct TestCert {
        pub cert_der: CertificateDer<'static>,
        pub cert_pem: String,
        pub key_pem: String,
        key_der: Vec<u8>,
    }

    impl TestCert {
        pub(crate) fn identity(&self) -> TlsIdentity {
            TlsIdentity {
                cert_chain: vec![self.cert_der.clone()],
                key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone())),
            }
        }
    }

    pub(crate) fn self_signed(names: &[&str]) -> TestCert {
        let key = KeyPair::generate().unwrap();
        let params =
            CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
        let cert = params.self_signed(&key).unwrap();

        TestCert {
            cert_der: cert.der().clone(),
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            key_der: key.serialize_der(),
        }
    }
}
