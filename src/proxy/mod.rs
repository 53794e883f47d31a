//! Censoring network intermediaries.
//!
//! This module provides the proxies the firewall redirects traffic into:
//! - [`CensoringResolver`]: UDP DNS with block/hijack/ignore keyword sets
//! - [`CensoringHttpProxy`]: HTTP/1.1 with a 451 block page
//! - [`CensoringTlsProxy`]: SNI-aware TCP relay with alert-or-reset blocking
//! - [`BadProxy`]: a middlebox that kills connections, optionally after
//!   presenting a rogue certificate
//!
//! # Architecture
//!
//! ```text
//!   client ──▶ kernel rules ──┬─▶ DROP / REJECT (firewall)
//!                             │
//!                             ├─▶ udp/53  ─▶ CensoringResolver  ─▶ Resolver
//!                             ├─▶ tcp/80  ─▶ CensoringHttpProxy ─▶ RoundTripper
//!                             └─▶ tcp/443 ─▶ CensoringTlsProxy  ─▶ Dialer
//! ```
//!
//! Every proxy is started with `start(addr)` and returns a [`ServerHandle`].
//! Shutting a handle down stops accepting; in-flight connections finish on
//! their own.
//!
//! # Example
//!
//! ```ignore
//! use censorbox::proxy::{CensoringTlsProxy, KeywordSet};
//! use censorbox::upstream::TcpDialer;
//! use std::sync::Arc;
//!
//! let proxy = CensoringTlsProxy::new(KeywordSet::new(["ooni.io"]), Arc::new(TcpDialer::default()), audit);
//! let handle = proxy.start("127.0.0.1:443".parse()?).await?;
//! // ...
//! handle.shutdown().await;
//! ```

pub mod badproxy;
pub mod ca;
pub mod certs;
pub mod dns;
pub mod error;
mod handle;
pub mod http;
pub mod keyword;
pub mod sni;
pub mod tls;

pub use badproxy::BadProxy;
pub use ca::RogueCa;
pub use dns::{CensoringResolver, DnsDecision, DnsPolicy};
pub use error::{CaError, ProxyError, ProxyResult};
pub use handle::ServerHandle;
pub use http::CensoringHttpProxy;
pub use keyword::KeywordSet;
pub use sni::SniError;
pub use tls::CensoringTlsProxy;
