//! Configuration system for censorbox.
//!
//! This module provides TOML configuration loading with layered merging.
//! Each censoring component is configured in its own section of the file.
//!
//! # Configuration Layers
//!
//! 1. Embedded defaults
//! 2. Config file (via `--config` flag)
//! 3. CLI flags (highest priority)
//!
//! # Merge Behavior
//!
//! - **Lists** (block, hijack, drop_ip, etc.) are **merged** (appended)
//! - **Scalars** (addresses, tag, hijack targets) are **overridden**
//!
//! Addresses are typed, so an unparsable IP or socket address is rejected
//! while loading, never later when the firewall is applied.

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    BadProxyConfig, Config, DnsProxyConfig, GeneralConfig, HttpProxyConfig, IptablesConfig,
    TlsProxyConfig, UpstreamConfig, validate_hex_keyword,
};
