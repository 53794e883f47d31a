//! Appliance orchestration and lifecycle management.
//!
//! This module wires the configured components together: it starts every
//! enabled proxy on its address and only then installs the firewall policy
//! that steers traffic into them. Teardown runs in the opposite direction so
//! traffic is never redirected to a listener that is already gone.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, UpstreamConfig};
use crate::firewall::{FirewallError, Iptables, PacketPolicy};
use crate::proxy::{
    BadProxy, CaError, CensoringHttpProxy, CensoringResolver, CensoringTlsProxy, DnsPolicy,
    KeywordSet, ProxyError, RogueCa, ServerHandle,
};
use crate::telemetry::AuditLogger;
use crate::upstream::{Dialer, DotResolver, HyperTransport, Resolver, RoundTripper, TcpDialer};

/// Errors raised while bringing the appliance up.
#[derive(Debug, Error)]
pub enum ApplianceError {
    /// A listener failed to start.
    #[error("Failed to start {component}: {source}")]
    Start {
        /// Component that failed.
        component: &'static str,
        /// The underlying proxy error.
        #[source]
        source: ProxyError,
    },

    /// The rogue CA could not be generated, loaded or written.
    #[error("Rogue CA error: {0}")]
    Ca(#[from] CaError),

    /// The firewall policy could not be installed.
    #[error("Firewall error: {0}")]
    Firewall(#[from] FirewallError),
}

fn start_error(component: &'static str) -> impl FnOnce(ProxyError) -> ApplianceError {
    move |source| ApplianceError::Start { component, source }
}

/// The uncensored path shared by all proxies.
#[derive(Clone)]
pub struct Upstream {
    /// Used by the DNS proxy for names it does not censor.
    pub resolver: Arc<dyn Resolver>,
    /// Used by the TLS proxy to reach the real server.
    pub dialer: Arc<dyn Dialer>,
    /// Used by the HTTP proxy to forward requests.
    pub transport: Arc<dyn RoundTripper>,
}

impl Upstream {
    /// DNS-over-TLS resolution through the configured server plus direct
    /// TCP and HTTP.
    pub fn uncensored(config: &UpstreamConfig) -> Self {
        let connect_timeout = config.connect_timeout();
        Self {
            resolver: Arc::new(DotResolver::over_tls(
                config.resolver_address,
                &config.resolver_tls_name,
            )),
            dialer: Arc::new(TcpDialer::new(connect_timeout)),
            transport: Arc::new(HyperTransport::new(connect_timeout)),
        }
    }
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream").finish_non_exhaustive()
    }
}

/// Iptables commands for the configured firewall policy, cleanup first.
///
/// Pure rendering; nothing is executed and no privileges are needed.
pub fn firewall_plan(config: &Config) -> Vec<String> {
    let policy = PacketPolicy::with_runner(config.iptables.to_policy(), Arc::new(Iptables::new()));
    let mut plan = policy.render_waive();
    plan.extend(policy.render_apply());
    plan
}

/// A configured, not yet started appliance.
pub struct Appliance {
    config: Config,
    upstream: Upstream,
    audit: Arc<AuditLogger>,
    packet_policy: Option<PacketPolicy>,
}

impl Appliance {
    /// Build an appliance from configuration.
    ///
    /// When `[iptables]` is enabled the policy is bound to the system
    /// `iptables`, which fails off Linux.
    pub fn new(
        config: Config,
        upstream: Upstream,
        audit: Arc<AuditLogger>,
    ) -> Result<Self, ApplianceError> {
        let packet_policy = if config.iptables.enabled {
            Some(PacketPolicy::new(config.iptables.to_policy())?.with_audit(audit.clone()))
        } else {
            debug!("Firewall disabled by configuration");
            None
        };

        Ok(Self {
            config,
            upstream,
            audit,
            packet_policy,
        })
    }

    /// Replace the firewall policy (tests use a scripted runner).
    pub fn with_packet_policy(mut self, policy: PacketPolicy) -> Self {
        self.packet_policy = Some(policy);
        self
    }

    /// Start every enabled component, then install the firewall policy.
    ///
    /// Stale rules from a crashed run are waived first. On failure the
    /// listeners started so far are shut down and the firewall is waived
    /// again before the error is returned.
    pub async fn start(self) -> Result<RunningAppliance, ApplianceError> {
        if let Some(ref policy) = self.packet_policy {
            policy.waive();
        }

        let mut handles = Vec::new();
        let mut ca_cert_pem = None;

        let result = match self.start_listeners(&mut handles, &mut ca_cert_pem).await {
            Ok(()) => self.apply_firewall(),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("Appliance startup failed, cleaning up: {}", e);
            if let Some(ref policy) = self.packet_policy {
                policy.waive();
            }
            for handle in handles.into_iter().rev() {
                handle.shutdown().await;
            }
            return Err(e);
        }

        info!("Appliance running with {} listeners", handles.len());
        Ok(RunningAppliance {
            handles,
            packet_policy: self.packet_policy,
            ca_cert_pem,
        })
    }

    fn apply_firewall(&self) -> Result<(), ApplianceError> {
        match self.packet_policy {
            Some(ref policy) => Ok(policy.apply()?),
            None => Ok(()),
        }
    }

    async fn start_listeners(
        &self,
        handles: &mut Vec<ServerHandle>,
        ca_cert_pem: &mut Option<String>,
    ) -> Result<(), ApplianceError> {
        let cfg = &self.config;

        if cfg.bad_proxy.enabled {
            let bad = BadProxy::new(self.audit.clone())
                .with_deadline(cfg.bad_proxy.deadline())
                .with_read_limit(cfg.bad_proxy.read_limit)
                .with_default_sni(cfg.bad_proxy.default_sni.clone());
            handles.push(
                bad.start(cfg.bad_proxy.address)
                    .await
                    .map_err(start_error("bad_proxy"))?,
            );

            let ca = match (&cfg.bad_proxy.ca_cert, &cfg.bad_proxy.ca_key) {
                (Some(cert), Some(key)) => {
                    info!("Loading rogue CA from {:?}", cert);
                    RogueCa::load(cert, key)?
                }
                _ => RogueCa::generate()?,
            };
            if let Some(ref path) = cfg.bad_proxy.tls_output_ca {
                ca.write_cert_pem(path)?;
                info!("Wrote bad proxy CA certificate to {:?}", path);
            }
            *ca_cert_pem = Some(ca.cert_pem().to_string());

            handles.push(
                bad.start_tls(cfg.bad_proxy.tls_address, Arc::new(ca))
                    .await
                    .map_err(start_error("bad_proxy_tls"))?,
            );
        }

        if cfg.dns_proxy.enabled {
            let policy = DnsPolicy {
                blocked: KeywordSet::new(&cfg.dns_proxy.block),
                hijacked: KeywordSet::new(&cfg.dns_proxy.hijack),
                ignored: KeywordSet::new(&cfg.dns_proxy.ignore),
            };
            let resolver =
                CensoringResolver::new(policy, self.upstream.resolver.clone(), self.audit.clone());
            handles.push(
                resolver
                    .start(cfg.dns_proxy.address)
                    .await
                    .map_err(start_error("dns_proxy"))?,
            );
        }

        if cfg.http_proxy.enabled {
            let proxy = CensoringHttpProxy::new(
                KeywordSet::new(&cfg.http_proxy.block),
                self.upstream.transport.clone(),
                self.audit.clone(),
            );
            handles.push(
                proxy
                    .start(cfg.http_proxy.address)
                    .await
                    .map_err(start_error("http_proxy"))?,
            );
        }

        if cfg.tls_proxy.enabled {
            let proxy = CensoringTlsProxy::new(
                KeywordSet::new(&cfg.tls_proxy.block),
                self.upstream.dialer.clone(),
                self.audit.clone(),
            )
            .with_upstream_port(cfg.tls_proxy.upstream_port);
            handles.push(
                proxy
                    .start(cfg.tls_proxy.address)
                    .await
                    .map_err(start_error("tls_proxy"))?,
            );
        }

        Ok(())
    }
}

impl std::fmt::Debug for Appliance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appliance")
            .field("config", &self.config)
            .field("firewall", &self.packet_policy.is_some())
            .finish()
    }
}

/// A started appliance.
pub struct RunningAppliance {
    handles: Vec<ServerHandle>,
    packet_policy: Option<PacketPolicy>,
    ca_cert_pem: Option<String>,
}

impl RunningAppliance {
    /// Handles of all running listeners, in start order.
    pub fn handles(&self) -> &[ServerHandle] {
        &self.handles
    }

    /// Bound address of the named listener (`"dns_proxy"`, `"tls_proxy"`, ...).
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.handles
            .iter()
            .find(|h| h.name() == name)
            .map(ServerHandle::local_addr)
    }

    /// PEM of the bad proxy's rogue CA, when the bad proxy runs.
    pub fn ca_cert_pem(&self) -> Option<&str> {
        self.ca_cert_pem.as_deref()
    }

    /// Waive the firewall policy, then stop every listener.
    pub async fn shutdown(self) {
        info!("Shutting down appliance");
        if let Some(ref policy) = self.packet_policy {
            policy.waive();
        }
        for handle in self.handles.into_iter().rev() {
            handle.shutdown().await;
        }
    }
}

impl std::fmt::Debug for RunningAppliance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningAppliance")
            .field("handles", &self.handles)
            .field("firewall", &self.packet_policy.is_some())
            .finish()
    }
}
