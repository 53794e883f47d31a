//! Censoring DNS resolver.
//!
//! A UDP DNS responder that checks the first question's name against three
//! keyword sets, in order:
//!
//! | Set      | Outcome                                          |
//! |----------|--------------------------------------------------|
//! | ignored  | no response at all (the client times out)        |
//! | blocked  | NXDOMAIN, zero records                           |
//! | hijacked | one A record for 127.0.0.1                       |
//! | (none)   | resolved upstream, IPv4 answers only             |
//!
//! An upstream failure is answered exactly like a block, so a client cannot
//! tell deliberate censorship from a real failure. IPv6 answers from the
//! upstream are dropped because only A records are synthesized.

use super::error::ProxyError;
use super::handle::{ServerHandle, shutdown_requested};
use super::keyword::KeywordSet;
use crate::telemetry::{AuditEvent, AuditLogger};
use crate::upstream::Resolver;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use trust_dns_resolver::proto::op::{Message, MessageType, Query, ResponseCode};
use trust_dns_resolver::proto::rr::rdata::A;
use trust_dns_resolver::proto::rr::{RData, Record};

/// Largest datagram accepted from a client.
const MAX_DATAGRAM: usize = 4096;

/// TTL on every synthesized record; decisions are never cached downstream.
const ANSWER_TTL: u32 = 0;

/// Keyword sets consulted for every query.
#[derive(Debug, Clone, Default)]
pub struct DnsPolicy {
    /// Names answered with NXDOMAIN.
    pub blocked: KeywordSet,
    /// Names answered with 127.0.0.1.
    pub hijacked: KeywordSet,
    /// Names never answered.
    pub ignored: KeywordSet,
}

/// What to do with a query name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsDecision {
    /// Drop the query without answering.
    Ignore(String),
    /// Answer NXDOMAIN.
    Block(String),
    /// Answer 127.0.0.1.
    Hijack(String),
    /// Resolve through the upstream resolver.
    Forward,
}

impl DnsPolicy {
    /// Decide the fate of `name`. The matching keyword is carried along.
    pub fn decide(&self, name: &str) -> DnsDecision {
        if let Some(k) = self.ignored.find(name) {
            DnsDecision::Ignore(k.to_string())
        } else if let Some(k) = self.blocked.find(name) {
            DnsDecision::Block(k.to_string())
        } else if let Some(k) = self.hijacked.find(name) {
            DnsDecision::Hijack(k.to_string())
        } else {
            DnsDecision::Forward
        }
    }
}

/// DNS server applying a [`DnsPolicy`].
pub struct CensoringResolver {
    policy: DnsPolicy,
    upstream: Arc<dyn Resolver>,
    audit: Arc<AuditLogger>,
}

impl CensoringResolver {
    /// Create a resolver forwarding unmatched names to `upstream`.
    pub fn new(policy: DnsPolicy, upstream: Arc<dyn Resolver>, audit: Arc<AuditLogger>) -> Self {
        Self {
            policy,
            upstream,
            audit,
        }
    }

    /// Answer a parsed query, or return `None` to stay silent.
    pub async fn handle_query(&self, query: &Message) -> Option<Message> {
        let Some(question) = query.queries().first() else {
            debug!("Query {} has no question", query.id());
            return Some(reply(query, ResponseCode::ServFail));
        };

        let name = question.name().to_utf8();

        match self.policy.decide(&name) {
            DnsDecision::Ignore(keyword) => {
                info!("Ignoring DNS query for {} (keyword '{}')", name, keyword);
                self.audit.log(AuditEvent::DnsIgnore { name, keyword });
                None
            }
            DnsDecision::Block(keyword) => {
                info!("Blocking DNS query for {} (keyword '{}')", name, keyword);
                self.audit.log(AuditEvent::DnsBlock { name, keyword });
                Some(reply(query, ResponseCode::NXDomain))
            }
            DnsDecision::Hijack(keyword) => {
                info!("Hijacking DNS query for {} (keyword '{}')", name, keyword);
                self.audit.log(AuditEvent::DnsHijack { name, keyword });
                Some(answer(query, question, &[IpAddr::V4(Ipv4Addr::LOCALHOST)]))
            }
            DnsDecision::Forward => match self.upstream.lookup_host(&name).await {
                Ok(addrs) => {
                    trace!("Upstream answered {} with {:?}", name, addrs);
                    Some(answer(query, question, &addrs))
                }
                Err(e) => {
                    debug!("Upstream lookup for {} failed: {}", name, e);
                    Some(reply(query, ResponseCode::NXDomain))
                }
            },
        }
    }

    /// Answer a raw datagram. Unparsable datagrams are dropped.
    pub async fn handle_datagram(&self, datagram: &[u8]) -> Option<Vec<u8>> {
        let query = match Message::from_vec(datagram) {
            Ok(query) => query,
            Err(e) => {
                debug!("Dropping unparsable DNS datagram: {}", e);
                return None;
            }
        };

        let response = self.handle_query(&query).await?;
        match response.to_vec() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Failed to encode DNS response: {}", e);
                None
            }
        }
    }

    /// Bind `addr` and start answering queries.
    pub async fn start(self, addr: SocketAddr) -> Result<ServerHandle, ProxyError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = socket.local_addr()?;
        info!("DNS proxy listening on {}", local_addr);

        let socket = Arc::new(socket);
        let resolver = Arc::new(self);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    recv_result = socket.recv_from(&mut buf) => {
                        match recv_result {
                            Ok((n, peer)) => {
                                let datagram = buf[..n].to_vec();
                                let socket = socket.clone();
                                let resolver = resolver.clone();
                                tokio::spawn(async move {
                                    if let Some(response) = resolver.handle_datagram(&datagram).await
                                        && let Err(e) = socket.send_to(&response, peer).await
                                    {
                                        debug!("Failed to answer {}: {}", peer, e);
                                    }
                                });
                            }
                            Err(e) => {
                                warn!("Failed to receive DNS datagram: {}", e);
                            }
                        }
                    }
                    _ = shutdown_requested(&mut shutdown_rx) => {
                        info!("DNS proxy shutting down");
                        break;
                    }
                }
            }
        });

        Ok(ServerHandle::new("dns_proxy", local_addr, shutdown_tx, task))
    }
}

impl std::fmt::Debug for CensoringResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CensoringResolver")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Response header mirroring `query`, with the question echoed.
fn reply(query: &Message, code: ResponseCode) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true)
        .set_response_code(code);
    if let Some(question) = query.queries().first() {
        response.add_query(question.clone());
    }
    response
}

/// Successful response carrying one A record per IPv4 address in `addrs`.
fn answer(query: &Message, question: &Query, addrs: &[IpAddr]) -> Message {
    let mut response = reply(query, ResponseCode::NoError);
    for addr in addrs {
        if let IpAddr::V4(v4) = addr {
            response.add_answer(Record::from_rdata(
                question.name().clone(),
                ANSWER_TTL,
                RData::A(A::from(*v4)),
            ));
        }
    }
    response
}
