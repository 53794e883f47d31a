//! DNS-over-TLS resolver for the uncensored path.
//!
//! The DNS hijack rule redirects *every* outbound UDP/53 datagram, including
//! the appliance's own. Resolving over TLS (TCP/853) keeps the appliance's
//! lookups out of its own redirect.

use super::{BoxFuture, Resolver};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};

/// Resolver backed by trust-dns speaking DNS-over-TLS.
pub struct DotResolver {
    inner: TokioAsyncResolver,
}

impl DotResolver {
    /// Resolve through the DNS-over-TLS server at `addr`, whose certificate
    /// must be valid for `tls_name`.
    pub fn over_tls(addr: SocketAddr, tls_name: &str) -> Self {
        debug!("Uncensored resolver is {} ({})", addr, tls_name);
        let servers = NameServerConfigGroup::from_ips_tls(
            &[addr.ip()],
            addr.port(),
            tls_name.to_string(),
            true,
        );
        Self::with_config(ResolverConfig::from_parts(None, vec![], servers))
    }

    /// Resolve through an arbitrary trust-dns configuration.
    pub fn with_config(config: ResolverConfig) -> Self {
        let mut opts = ResolverOpts::default();
        // Every decision is recomputed per query; no answers are reused.
        opts.cache_size = 0;
        Self {
            inner: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

impl Resolver for DotResolver {
    fn lookup_host<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>> {
        Box::pin(async move {
            debug!("Resolving {} upstream", name);
            let lookup = self
                .inner
                .lookup_ip(name)
                .await
                .map_err(|e| io::Error::other(e.to_string()))?;
            Ok(lookup.iter().collect())
        })
    }
}

impl std::fmt::Debug for DotResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DotResolver").finish_non_exhaustive()
    }
}
