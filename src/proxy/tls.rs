//! SNI-aware TLS proxy.
//!
//! This module provides a raw TCP proxy that:
//! - Reads exactly the records carrying the ClientHello, recording them
//! - Resets connections whose ClientHello yields no server name
//! - Answers blocked server names with a single fatal alert record
//! - Dials the server name through the injected [`Dialer`] otherwise, replays
//!   the recorded bytes and relays both directions until either side closes
//!
//! The proxy never terminates TLS. The client negotiates directly with the
//! real server, so a forwarded connection is indistinguishable from a direct
//! one.

use super::error::ProxyError;
use super::handle::{ServerHandle, accept_loop, bind};
use super::keyword::KeywordSet;
use super::sni::{RecordingReader, sniff_server_name};
use crate::telemetry::{AuditEvent, AuditLogger};
use crate::upstream::Dialer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, copy_bidirectional};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Fatal `internal_error` alert record sent to blocked clients.
///
/// Content type 21 (alert), record version 3.3, length 2, level 2 (fatal),
/// description 80 (internal_error).
pub const BLOCK_ALERT: [u8; 7] = [21, 3, 3, 0, 2, 2, 80];

/// Port dialed on the real server when none is configured.
pub const DEFAULT_UPSTREAM_PORT: u16 = 443;

/// TLS proxy that censors by server name.
pub struct CensoringTlsProxy {
    blocked: KeywordSet,
    dialer: Arc<dyn Dialer>,
    upstream_port: u16,
    audit: Arc<AuditLogger>,
}

impl CensoringTlsProxy {
    /// Create a proxy blocking any server name containing one of `blocked`.
    pub fn new(blocked: KeywordSet, dialer: Arc<dyn Dialer>, audit: Arc<AuditLogger>) -> Self {
        Self {
            blocked,
            dialer,
            upstream_port: DEFAULT_UPSTREAM_PORT,
            audit,
        }
    }

    /// Dial upstream servers on `port` instead of 443.
    pub fn with_upstream_port(mut self, port: u16) -> Self {
        self.upstream_port = port;
        self
    }

    /// Bind `addr` and start accepting connections.
    pub async fn start(self, addr: SocketAddr) -> Result<ServerHandle, ProxyError> {
        let listener = bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("TLS proxy listening on {}", local_addr);

        let proxy = Arc::new(self);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            "TLS proxy",
            move |stream, peer| {
                let proxy = proxy.clone();
                async move { proxy.handle_connection(stream, peer, local_addr).await }
            },
        ));

        Ok(ServerHandle::new("tls_proxy", local_addr, shutdown_tx, task))
    }

    async fn handle_connection(&self, client: TcpStream, peer: SocketAddr, listen: SocketAddr) {
        let mut reader = RecordingReader::new(client);

        let sni = match sniff_server_name(&mut reader).await {
            Ok(sni) => sni,
            Err(e) => {
                debug!("Resetting {}: {}", peer, e);
                self.audit.log(AuditEvent::TlsReset {
                    peer,
                    reason: e.to_string(),
                });
                let (client, _) = reader.into_parts();
                reset(client);
                return;
            }
        };

        let (mut client, recorded) = reader.into_parts();

        if let Some(keyword) = self.blocked.find(&sni) {
            info!("Blocking TLS connection to {} (keyword '{}')", sni, keyword);
            self.audit.log(AuditEvent::TlsBlock {
                sni: sni.clone(),
                keyword: keyword.to_string(),
            });
            send_alert(&mut client).await;
            return;
        }

        let target = format!("{}:{}", sni, self.upstream_port);
        let mut upstream = match self.dialer.dial(&target).await {
            Ok(upstream) => upstream,
            Err(e) => {
                debug!("Failed to dial {} for {}: {}", target, peer, e);
                return;
            }
        };

        if connects_to_self(&upstream, listen) {
            warn!("Refusing to proxy {} back to ourselves", target);
            send_alert(&mut client).await;
            return;
        }

        debug!("Forwarding {} to {}", peer, target);
        if let Err(e) = relay(&mut client, &mut upstream, &recorded).await {
            debug!("TLS relay {} <-> {} ended: {}", peer, target, e);
        }
    }
}

impl std::fmt::Debug for CensoringTlsProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CensoringTlsProxy")
            .field("blocked", &self.blocked)
            .field("upstream_port", &self.upstream_port)
            .finish_non_exhaustive()
    }
}

/// Replay the sniffed bytes, then copy both directions until both finish.
async fn relay(
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    recorded: &[u8],
) -> std::io::Result<()> {
    upstream.write_all(recorded).await?;
    let (to_upstream, to_client) = copy_bidirectional(client, upstream).await?;
    debug!(
        "TLS relay closed ({} bytes up, {} bytes down)",
        to_upstream as usize + recorded.len(),
        to_client
    );
    Ok(())
}

async fn send_alert(client: &mut TcpStream) {
    if let Err(e) = client.write_all(&BLOCK_ALERT).await {
        debug!("Failed to send TLS alert: {}", e);
        return;
    }
    let _ = client.shutdown().await;
}

/// Close `stream` with an RST instead of a FIN.
pub(crate) fn reset(stream: TcpStream) {
    #[allow(deprecated)]
    if let Err(e) = stream.set_linger(Some(Duration::ZERO)) {
        debug!("Failed to set SO_LINGER: {}", e);
    }
    drop(stream);
}

/// Whether `upstream` leads back into the listener bound at `listen`.
fn connects_to_self(upstream: &TcpStream, listen: SocketAddr) -> bool {
    match (upstream.peer_addr(), upstream.local_addr()) {
        (Ok(remote), Ok(local)) => is_self_connection(remote, local, listen),
        _ => false,
    }
}

/// Decide from the dialed socket's endpoints whether it reached `listen`.
///
/// A wildcard listener owns its port on every local address. A connection
/// to one of the host's own addresses has equal source and destination IPs.
fn is_self_connection(remote: SocketAddr, local: SocketAddr, listen: SocketAddr) -> bool {
    if remote == local || remote == listen {
        return true;
    }
    listen.ip().is_unspecified()
        && remote.port() == listen.port()
        && (remote.ip().is_loopback() || remote.ip() == local.ip())
}
