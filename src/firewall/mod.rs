//! Kernel packet filtering and NAT.
//!
//! This module translates a declarative [`FirewallPolicy`] into iptables
//! rules that either drop/reset traffic before any proxy sees it, or
//! NAT-redirect DNS, HTTP and HTTPS to the local proxies.
//!
//! # Routing loops
//!
//! The HTTP(S) hijack rules exclude root-owned traffic
//! (`-m owner ! --uid-owner 0`): the appliance runs as root and dials the
//! real destinations itself, so redirecting its own connections would send
//! them straight back into the proxies. The DNS hijack needs no exclusion
//! because the appliance resolves over DNS-over-TLS, never UDP/53.
//!
//! # Example
//!
//! ```ignore
//! use censorbox::firewall::{FirewallPolicy, PacketPolicy};
//!
//! let policy = PacketPolicy::new(FirewallPolicy {
//!     drop_ips: vec!["1.1.1.1".parse()?],
//!     ..Default::default()
//! })?;
//! policy.waive(); // clean up after a crashed run
//! let result = policy.apply();
//! // ...
//! policy.waive();
//! ```

pub mod error;
pub mod policy;
pub mod rule;
pub mod runner;

pub use error::FirewallError;
pub use policy::{FirewallPolicy, PacketPolicy};
pub use rule::{Chain, Keyword, Match, Protocol, Rule, Step, Table, Target};
pub use runner::{CommandRunner, Iptables};
