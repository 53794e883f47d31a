//! Capabilities for reaching the real, uncensored Internet.
//!
//! The censoring proxies never resolve, dial or forward on their own. They
//! receive these narrow capabilities at construction time, which keeps the
//! censorship decision independent from connectivity and lets tests swap in
//! spies:
//!
//! - [`Resolver`]: name → addresses (used by the DNS proxy)
//! - [`Dialer`]: `host:port` → TCP stream (used by the TLS proxy)
//! - [`RoundTripper`]: HTTP request → HTTP response (used by the HTTP proxy)
//!
//! Default implementations live in the submodules. Cancellation is by
//! dropping the returned future.

mod dialer;
mod resolver;
mod transport;

pub use dialer::TcpDialer;
pub use resolver::DotResolver;
pub use transport::HyperTransport;

use crate::proxy::ProxyError;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{Request, Response};
use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use tokio::net::TcpStream;

/// Boxed, sendable future returned by the capability traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Body type flowing through the HTTP proxy in both directions.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Resolves host names through the uncensored path.
pub trait Resolver: Send + Sync {
    /// Look up all addresses for `name`.
    fn lookup_host<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>>;
}

/// Opens TCP connections through the uncensored path.
pub trait Dialer: Send + Sync {
    /// Connect to `addr`, given as `host:port`.
    fn dial<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, io::Result<TcpStream>>;
}

/// Performs HTTP exchanges through the uncensored path.
pub trait RoundTripper: Send + Sync {
    /// Send `req` and return the upstream response.
    fn round_trip(
        &self,
        req: Request<ProxyBody>,
    ) -> BoxFuture<'_, Result<Response<ProxyBody>, ProxyError>>;
}
