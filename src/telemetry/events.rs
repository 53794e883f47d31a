//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `CENSORBOX` tag.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;

/// Censorship decisions worth an audit record.
///
/// Forwarded (uncensored) traffic is deliberately absent; only interference
/// is recorded.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// DNS query answered with NXDOMAIN because of a blocked keyword.
    DnsBlock {
        /// Query name.
        name: String,
        /// Keyword that matched.
        keyword: String,
    },

    /// DNS query answered with 127.0.0.1 because of a hijack keyword.
    DnsHijack {
        /// Query name.
        name: String,
        /// Keyword that matched.
        keyword: String,
    },

    /// DNS query silently dropped because of an ignore keyword.
    DnsIgnore {
        /// Query name.
        name: String,
        /// Keyword that matched.
        keyword: String,
    },

    /// HTTP request answered with 451.
    HttpBlock {
        /// Request host.
        host: String,
        /// Keyword that matched.
        keyword: String,
    },

    /// TLS connection answered with a fatal alert.
    TlsBlock {
        /// Server name from the ClientHello.
        sni: String,
        /// Keyword that matched.
        keyword: String,
    },

    /// TLS connection reset because no SNI could be extracted.
    TlsReset {
        /// Client address.
        peer: SocketAddr,
        /// Why the ClientHello was unusable.
        reason: String,
    },

    /// Bad proxy tore a connection down.
    BadProxyClose {
        /// Client address.
        peer: SocketAddr,
        /// Whether the rogue-certificate listener handled it.
        tls: bool,
    },

    /// Firewall policy installed or removed.
    Firewall {
        /// What happened to the policy.
        action: FirewallAction,
        /// Number of rules in the policy.
        rules: usize,
    },
}

/// Firewall lifecycle transitions.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallAction {
    /// Policy applied.
    Apply,
    /// Policy waived.
    Waive,
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}
