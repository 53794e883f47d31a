//! Plain TCP dialer.

use super::{BoxFuture, Dialer};
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Dials with the host's resolver and routing table, bounded by a timeout.
///
/// The appliance runs as root, so these connections are exempt from the
/// HTTP(S) hijack rules and reach the real destination.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    /// Create a dialer with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Dialer for TcpDialer {
    fn dial<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, io::Result<TcpStream>> {
        Box::pin(async move {
            debug!("Dialing upstream {}", addr);
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                )),
            }
        })
    }
}
