//! censorbox: a censorship injection appliance
//!
//! This crate provides cooperating network intermediaries that reproduce, on
//! demand, the interference techniques real censors use, so a measurement
//! client can be exercised against deterministic censorship without a live
//! censored network.
//!
//! # Fidelity Model
//!
//! A blocked connection must look, from the outside, exactly like the
//! real-world technique being simulated: a timeout, an RST, an NXDOMAIN, an
//! HTTP 451 or a TLS alert. When no rule matches, the client must believe it
//! talked to the real destination.
//!
//! # Architecture
//!
//! - **Firewall**: typed iptables rules for IP/keyword drop and reset, plus
//!   NAT hijacking of DNS/HTTP/HTTPS towards the local proxies
//! - **Proxy**: the censoring DNS resolver, HTTP proxy, SNI-aware TLS proxy and
//!   the bad proxy (middlebox fault injector)
//! - **Upstream**: capability traits for the uncensored path (resolve, dial,
//!   round-trip) and their default implementations
//! - **Config**: TOML configuration merged with CLI flags
//! - **Telemetry**: structured syslog audit trail of censorship decisions

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod appliance;
pub mod cli;
pub mod config;
pub mod firewall;
pub mod proxy;
pub mod telemetry;
pub mod upstream;
