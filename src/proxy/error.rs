//! Error types for proxy operations.
//!
//! This module defines structured error types for the censoring proxies:
//! - Server errors (binding, accept)
//! - Upstream errors (dialing, forwarding, resolving)
//! - TLS errors (rogue CA, leaf certificates, ClientHello parsing)

use thiserror::Error;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations, file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Failed to bind a listening socket.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// The address we tried to bind to.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TLS error during handshake or certificate operations.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Rogue CA operation failed.
    #[error("Certificate authority error: {0}")]
    Ca(#[from] CaError),

    /// Failed to reach the upstream destination.
    #[error("Failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect {
        /// The address we tried to connect to.
        addr: String,
        /// Error message.
        message: String,
    },

    /// The request could not be rewritten for forwarding.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        ProxyError::Tls(err.to_string())
    }
}

/// Errors raised while generating or loading the rogue CA.
#[derive(Debug, Error)]
pub enum CaError {
    /// Key pair generation or parsing failed.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Self-signed CA certificate creation failed.
    #[error("CA certificate generation failed: {0}")]
    CertGeneration(String),

    /// Signing a leaf certificate failed.
    #[error("Certificate signing failed: {0}")]
    Signing(String),

    /// A leaf certificate was requested for an unusable name.
    #[error("Invalid certificate name: {0}")]
    InvalidName(String),

    /// Reading CA material failed.
    #[error("Failed to read CA file: {0}")]
    ReadFile(#[source] std::io::Error),

    /// Writing CA material failed.
    #[error("Failed to write CA file: {0}")]
    WriteFile(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_connect_error() {
        let err = ProxyError::UpstreamConnect {
            addr: "example.com:443".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("example.com:443"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_bind_error_names_address() {
        let err = ProxyError::Bind {
            addr: "127.0.0.1:53".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("127.0.0.1:53"));
    }

    #[test]
    fn test_ca_error_conversion() {
        let err: ProxyError = CaError::Signing("bad issuer".into()).into();
        assert!(matches!(err, ProxyError::Ca(CaError::Signing(_))));
        assert!(err.to_string().contains("bad issuer"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let proxy_err: ProxyError = io_err.into();
        assert!(matches!(proxy_err, ProxyError::Io(_)));
    }
}
