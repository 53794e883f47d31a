//! SNI-driven certificate resolution for the bad proxy.
//!
//! The bad proxy's TLS listener presents a certificate minted by the rogue CA
//! for whatever server name the client asked for. A fresh leaf is signed for
//! every handshake; nothing is remembered between connections.

use super::ca::RogueCa;
use super::error::ProxyError;
use rustls::ServerConfig;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, trace};

/// Mint a leaf for `domain` and turn it into a rustls signing identity.
pub fn certified_leaf(ca: &RogueCa, domain: &str) -> Result<Arc<CertifiedKey>, ProxyError> {
    let leaf = ca.generate_cert(&domain.to_ascii_lowercase())?;

    let cert_chain: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut leaf.cert_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ProxyError::Tls(format!("Failed to parse certificate PEM: {}", e)))?;

    if cert_chain.is_empty() {
        return Err(ProxyError::Tls("No certificates found in PEM".into()));
    }

    let private_key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut leaf.key_pem.as_bytes())
            .map_err(|e| ProxyError::Tls(format!("Failed to parse private key PEM: {}", e)))?
            .ok_or_else(|| ProxyError::Tls("No private key found in PEM".into()))?;

    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&private_key)
        .map_err(|e| ProxyError::Tls(format!("Failed to create signing key: {}", e)))?;

    Ok(Arc::new(CertifiedKey::new(cert_chain, signing_key)))
}

/// Resolves the server certificate from the ClientHello's SNI.
pub struct DynamicCertResolver {
    ca: Arc<RogueCa>,
    /// Name used for clients that send no SNI.
    default_name: String,
}

impl DynamicCertResolver {
    /// Create a resolver falling back to `default_name` for SNI-less clients.
    pub fn new(ca: Arc<RogueCa>, default_name: impl Into<String>) -> Self {
        Self {
            ca,
            default_name: default_name.into(),
        }
    }
}

impl ResolvesServerCert for DynamicCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let domain = client_hello
            .server_name()
            .unwrap_or(self.default_name.as_str());

        trace!("Minting rogue certificate for: {}", domain);

        match certified_leaf(&self.ca, domain) {
            Ok(key) => Some(key),
            Err(e) => {
                error!("Failed to generate certificate for {}: {}", domain, e);
                None
            }
        }
    }
}

impl std::fmt::Debug for DynamicCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicCertResolver")
            .field("default_name", &self.default_name)
            .finish_non_exhaustive()
    }
}

/// Build a TLS acceptor presenting rogue leaf certificates signed by `ca`.
pub fn rogue_acceptor(ca: Arc<RogueCa>, default_name: &str) -> Result<TlsAcceptor, ProxyError> {
    // Fail at startup, not on the first handshake, if the fallback name is
    // not a valid certificate subject.
    certified_leaf(&ca, default_name)?;

    let resolver = Arc::new(DynamicCertResolver::new(ca, default_name));

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(resolver);

    debug!("Rogue TLS acceptor ready (default name {})", default_name);
    Ok(TlsAcceptor::from(Arc::new(config)))
}
