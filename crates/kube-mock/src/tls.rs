//! Self-signed certificate for HTTPS servers.

use crate::error::{MockError, Result};
use rcgen::{generate_simple_self_signed, CertifiedKey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::sync::Arc;

/// Names the certificate is valid for.
pub const SUBJECT_ALT_NAMES: [&str; 2] = ["localhost", "127.0.0.1"];

/// Certificate and key of one HTTPS server. Clients of that server trust exactly this
/// certificate.
#[derive(Clone)]
pub struct TlsMaterial {
    cert_pem: String,
    cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial").finish_non_exhaustive()
    }
}

impl TlsMaterial {
    pub fn self_signed() -> Result<Self> {
        let names = SUBJECT_ALT_NAMES.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let CertifiedKey { cert, key_pair } =
            generate_simple_self_signed(names).map_err(|e| MockError::Tls(e.to_string()))?;

        Ok(Self {
            cert_pem: cert.pem(),
            cert_der: cert.der().clone(),
            key_der: key_pair.serialize_der(),
        })
    }

    /// PEM encoded certificate.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Server side configuration using the `ring` provider, advertising h2 and http/1.1.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()));

        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| MockError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(vec![self.cert_der.clone()], key)
            .map_err(|e| MockError::Tls(e.to_string()))?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(Arc::new(config))
    }

    /// Root certificate for clients of this server.
    pub fn client_certificate(&self) -> Result<reqwest::Certificate> {
        reqwest::Certificate::from_pem(self.cert_pem.as_bytes()).map_err(MockError::from)
    }
}
