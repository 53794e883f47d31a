//! Middlebox fault injector.
//!
//! The bad proxy models a middlebox that inspects the opening bytes of a
//! connection and then kills it without any visible error. It runs two
//! independent listeners:
//! - A plain listener that reads once (bounded in size and time) and closes
//! - A TLS listener that presents a rogue leaf certificate during the
//!   handshake, reads once if the client got that far, and closes, whatever
//!   the client thought of the certificate

use super::ca::RogueCa;
use super::certs::rogue_acceptor;
use super::error::ProxyError;
use super::handle::{ServerHandle, accept_loop, bind};
use crate::telemetry::{AuditEvent, AuditLogger};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, timeout_at};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

/// Absolute per-connection deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(250);

/// Maximum bytes read from the client before closing.
pub const DEFAULT_READ_LIMIT: usize = 128 * 1024;

/// Certificate name for clients that send no SNI.
pub const DEFAULT_SNI: &str = "example.com";

/// Connection killer for the plain and rogue-TLS listeners.
#[derive(Clone)]
pub struct BadProxy {
    deadline: Duration,
    read_limit: usize,
    default_sni: String,
    audit: Arc<AuditLogger>,
}

impl BadProxy {
    /// Create a bad proxy with the default deadline, read limit and SNI.
    pub fn new(audit: Arc<AuditLogger>) -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            read_limit: DEFAULT_READ_LIMIT,
            default_sni: DEFAULT_SNI.to_string(),
            audit,
        }
    }

    /// Override the per-connection deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Override the bounded read size.
    pub fn with_read_limit(mut self, read_limit: usize) -> Self {
        self.read_limit = read_limit.max(1);
        self
    }

    /// Override the certificate name used for SNI-less clients.
    pub fn with_default_sni(mut self, default_sni: impl Into<String>) -> Self {
        self.default_sni = default_sni.into();
        self
    }

    /// Start the plain listener on `addr`.
    pub async fn start(&self, addr: SocketAddr) -> Result<ServerHandle, ProxyError> {
        let listener = bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Bad proxy listening on {}", local_addr);

        let proxy = self.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            "bad proxy",
            move |stream, peer| {
                let proxy = proxy.clone();
                async move { proxy.handle_plain(stream, peer).await }
            },
        ));

        Ok(ServerHandle::new("bad_proxy", local_addr, shutdown_tx, task))
    }

    /// Start the rogue-certificate listener on `addr`, signing with `ca`.
    pub async fn start_tls(
        &self,
        addr: SocketAddr,
        ca: Arc<RogueCa>,
    ) -> Result<ServerHandle, ProxyError> {
        let acceptor = rogue_acceptor(ca, &self.default_sni)?;

        let listener = bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Bad proxy (TLS) listening on {}", local_addr);

        let proxy = self.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            "bad proxy (TLS)",
            move |stream, peer| {
                let proxy = proxy.clone();
                let acceptor = acceptor.clone();
                async move { proxy.handle_tls(stream, peer, acceptor).await }
            },
        ));

        Ok(ServerHandle::new("bad_proxy_tls", local_addr, shutdown_tx, task))
    }

    async fn handle_plain(&self, mut stream: TcpStream, peer: SocketAddr) {
        let deadline = Instant::now() + self.deadline;
        let mut buf = vec![0u8; self.read_limit];

        match timeout_at(deadline, stream.read(&mut buf)).await {
            Ok(Ok(n)) => debug!("Bad proxy read {} bytes from {}", n, peer),
            Ok(Err(e)) => debug!("Bad proxy read from {} failed: {}", peer, e),
            Err(_) => debug!("Bad proxy deadline expired for {}", peer),
        }

        self.audit.log(AuditEvent::BadProxyClose { peer, tls: false });
    }

    async fn handle_tls(&self, stream: TcpStream, peer: SocketAddr, acceptor: TlsAcceptor) {
        let deadline = Instant::now() + self.deadline;

        match timeout_at(deadline, acceptor.accept(stream)).await {
            Ok(Ok(mut tls)) => {
                debug!("Client {} accepted the rogue certificate", peer);
                let mut buf = vec![0u8; self.read_limit];
                match timeout_at(deadline, tls.read(&mut buf)).await {
                    Ok(Ok(n)) => debug!("Bad proxy read {} bytes from {} over TLS", n, peer),
                    Ok(Err(e)) => debug!("Bad proxy TLS read from {} failed: {}", peer, e),
                    Err(_) => debug!("Bad proxy deadline expired for {}", peer),
                }
            }
            Ok(Err(e)) => debug!("Rogue handshake with {} failed: {}", peer, e),
            Err(_) => debug!("Rogue handshake deadline expired for {}", peer),
        }

        self.audit.log(AuditEvent::BadProxyClose { peer, tls: true });
    }
}

impl std::fmt::Debug for BadProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BadProxy")
            .field("deadline", &self.deadline)
            .field("read_limit", &self.read_limit)
            .field("default_sni", &self.default_sni)
            .finish_non_exhaustive()
    }
}
