//! Configuration schema definitions.
//!
//! Every section has defaults matching a stock appliance, so an empty file
//! (or no file at all) yields a working configuration:
//!
//! ```toml
//! [general]
//! tag = "run-42"
//!
//! [dns_proxy]
//! address = "127.0.0.1:53"
//! block = ["ooni.io"]
//! hijack = ["ooni.nu"]
//!
//! [iptables]
//! hijack_dns_to = "127.0.0.1:53"
//! drop_keyword_hex = ["|6f 6f 6e 69|"]
//! ```

use super::error::ConfigError;
use crate::firewall::FirewallPolicy;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,

    /// Settings for the uncensored path.
    pub upstream: UpstreamConfig,

    /// Middlebox fault injector.
    pub bad_proxy: BadProxyConfig,

    /// Censoring DNS resolver.
    pub dns_proxy: DnsProxyConfig,

    /// Censoring HTTP proxy.
    pub http_proxy: HttpProxyConfig,

    /// Censoring TLS proxy.
    pub tls_proxy: TlsProxyConfig,

    /// Kernel packet filtering.
    pub iptables: IptablesConfig,
}

impl Config {
    /// Check values serde cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kw in self
            .iptables
            .drop_keyword_hex
            .iter()
            .chain(&self.iptables.reset_keyword_hex)
        {
            validate_hex_keyword(kw)?;
        }

        for kw in self
            .iptables
            .drop_keyword
            .iter()
            .chain(&self.iptables.reset_keyword)
        {
            if kw.is_empty() {
                return Err(invalid("iptables keyword", "must not be empty"));
            }
        }

        if self.bad_proxy.ca_cert.is_some() != self.bad_proxy.ca_key.is_some() {
            return Err(invalid(
                "bad_proxy.ca_cert",
                "ca_cert and ca_key must be set together",
            ));
        }
        if self.bad_proxy.read_limit == 0 {
            return Err(invalid("bad_proxy.read_limit", "must be positive"));
        }
        if self.bad_proxy.default_sni.trim().is_empty() {
            return Err(invalid("bad_proxy.default_sni", "must not be empty"));
        }
        if self.upstream.resolver_address.port() == 0 {
            return Err(invalid("upstream.resolver_address", "port must not be zero"));
        }
        if self.upstream.resolver_tls_name.trim().is_empty() {
            return Err(invalid("upstream.resolver_tls_name", "must not be empty"));
        }
        if self.tls_proxy.upstream_port == 0 {
            return Err(invalid("tls_proxy.upstream_port", "must not be zero"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Check iptables `--hex-string` syntax, e.g. `|6f 6f 6e 69|` or `ab|63|d`.
///
/// Pipes must pair up and enclose an even number of hex digits.
pub fn validate_hex_keyword(keyword: &str) -> Result<(), ConfigError> {
    let field = "iptables hex keyword";
    if keyword.matches('|').count() % 2 != 0 || !keyword.contains('|') {
        return Err(invalid(field, &format!("'{}' needs paired '|'", keyword)));
    }

    for (i, segment) in keyword.split('|').enumerate() {
        if i % 2 == 0 {
            continue;
        }
        let digits: String = segment.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.is_empty() || digits.len() % 2 != 0 {
            return Err(invalid(
                field,
                &format!("'{}' has an odd or empty hex run", keyword),
            ));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid(
                field,
                &format!("'{}' has non-hex digits between '|'", keyword),
            ));
        }
    }

    Ok(())
}

/// General application settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralConfig {
    /// Log level used when neither `-v` nor `RUST_LOG` is given.
    pub log_level: String,

    /// Tag attached to every audit event of this run.
    pub tag: String,
}

/// Settings for reaching the real Internet.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Timeout for upstream TCP connects in milliseconds.
    pub connect_timeout_ms: u64,

    /// DNS-over-TLS server used to resolve names the DNS proxy forwards.
    pub resolver_address: SocketAddr,

    /// Name expected in the resolver's TLS certificate.
    pub resolver_tls_name: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            resolver_address: SocketAddr::from(([1, 1, 1, 1], 853)),
            resolver_tls_name: "cloudflare-dns.com".to_string(),
        }
    }
}

impl UpstreamConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Bad proxy settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BadProxyConfig {
    /// Whether to run the bad proxy at all.
    pub enabled: bool,
    /// Plain listener address.
    pub address: SocketAddr,
    /// Rogue-certificate listener address.
    pub tls_address: SocketAddr,
    /// Where to write the rogue CA certificate, if anywhere.
    pub tls_output_ca: Option<PathBuf>,
    /// Existing CA certificate (PEM) to use instead of generating one.
    pub ca_cert: Option<PathBuf>,
    /// Private key (PEM) for `ca_cert`.
    pub ca_key: Option<PathBuf>,
    /// Per-connection deadline in milliseconds.
    pub deadline_ms: u64,
    /// Maximum bytes read before closing.
    pub read_limit: usize,
    /// Certificate name for clients that send no SNI.
    pub default_sni: String,
}

impl Default for BadProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: SocketAddr::from(([127, 0, 0, 1], 7117)),
            tls_address: SocketAddr::from(([127, 0, 0, 1], 4114)),
            tls_output_ca: Some(PathBuf::from("badproxy.pem")),
            ca_cert: None,
            ca_key: None,
            deadline_ms: 250,
            read_limit: 128 * 1024,
            default_sni: "example.com".to_string(),
        }
    }
}

impl BadProxyConfig {
    /// Deadline as a [`Duration`].
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// DNS proxy settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DnsProxyConfig {
    /// Whether to run the DNS proxy.
    pub enabled: bool,
    /// UDP listen address.
    pub address: SocketAddr,
    /// Keywords answered with NXDOMAIN.
    pub block: Vec<String>,
    /// Keywords answered with 127.0.0.1.
    pub hijack: Vec<String>,
    /// Keywords never answered.
    pub ignore: Vec<String>,
}

impl Default for DnsProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: SocketAddr::from(([127, 0, 0, 1], 53)),
            block: Vec::new(),
            hijack: Vec::new(),
            ignore: Vec::new(),
        }
    }
}

/// HTTP proxy settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HttpProxyConfig {
    /// Whether to run the HTTP proxy.
    pub enabled: bool,
    /// TCP listen address.
    pub address: SocketAddr,
    /// Host keywords answered with 451.
    pub block: Vec<String>,
}

impl Default for HttpProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: SocketAddr::from(([127, 0, 0, 1], 80)),
            block: Vec::new(),
        }
    }
}

/// TLS proxy settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TlsProxyConfig {
    /// Whether to run the TLS proxy.
    pub enabled: bool,
    /// TCP listen address.
    pub address: SocketAddr,
    /// SNI keywords answered with a TLS alert.
    pub block: Vec<String>,
    /// Port dialed on the real server.
    pub upstream_port: u16,
}

impl Default for TlsProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: SocketAddr::from(([127, 0, 0, 1], 443)),
            block: Vec::new(),
            upstream_port: 443,
        }
    }
}

/// Kernel packet filtering settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IptablesConfig {
    /// Whether to install firewall rules.
    pub enabled: bool,
    /// Drop traffic to these addresses.
    pub drop_ip: Vec<Ipv4Addr>,
    /// Drop traffic containing these keywords.
    pub drop_keyword: Vec<String>,
    /// Drop traffic containing these hex keywords.
    pub drop_keyword_hex: Vec<String>,
    /// Reset TCP traffic to these addresses.
    pub reset_ip: Vec<Ipv4Addr>,
    /// Reset TCP traffic containing these keywords.
    pub reset_keyword: Vec<String>,
    /// Reset TCP traffic containing these hex keywords.
    pub reset_keyword_hex: Vec<String>,
    /// Redirect DNS (UDP/53) here.
    pub hijack_dns_to: Option<SocketAddrV4>,
    /// Redirect HTTP (TCP/80) here.
    pub hijack_http_to: Option<SocketAddrV4>,
    /// Redirect HTTPS (TCP/443) here.
    pub hijack_https_to: Option<SocketAddrV4>,
}

impl Default for IptablesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            drop_ip: Vec::new(),
            drop_keyword: Vec::new(),
            drop_keyword_hex: Vec::new(),
            reset_ip: Vec::new(),
            reset_keyword: Vec::new(),
            reset_keyword_hex: Vec::new(),
            hijack_dns_to: None,
            hijack_http_to: None,
            hijack_https_to: None,
        }
    }
}

impl IptablesConfig {
    /// The declarative firewall policy these settings describe.
    pub fn to_policy(&self) -> FirewallPolicy {
        FirewallPolicy {
            drop_ips: self.drop_ip.clone(),
            reset_ips: self.reset_ip.clone(),
            drop_keywords: self.drop_keyword.clone(),
            drop_keywords_hex: self.drop_keyword_hex.clone(),
            reset_keywords: self.reset_keyword.clone(),
            reset_keywords_hex: self.reset_keyword_hex.clone(),
            hijack_dns_to: self.hijack_dns_to,
            hijack_https_to: self.hijack_https_to,
            hijack_http_to: self.hijack_http_to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bad_proxy.address.to_string(), "127.0.0.1:7117");
        assert_eq!(config.bad_proxy.tls_address.to_string(), "127.0.0.1:4114");
        assert_eq!(
            config.bad_proxy.tls_output_ca,
            Some(PathBuf::from("badproxy.pem"))
        );
        assert_eq!(config.dns_proxy.address.to_string(), "127.0.0.1:53");
        assert_eq!(config.http_proxy.address.to_string(), "127.0.0.1:80");
        assert_eq!(config.tls_proxy.address.to_string(), "127.0.0.1:443");
        assert_eq!(config.bad_proxy.deadline(), Duration::from_millis(250));
        assert_eq!(config.upstream.resolver_address.to_string(), "1.1.1.1:853");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [dns_proxy]
            block = ["ooni.io"]

            [tls_proxy]
            upstream_port = 8443
            "#,
        )
        .unwrap();

        assert_eq!(config.dns_proxy.block, vec!["ooni.io"]);
        assert_eq!(config.dns_proxy.address.to_string(), "127.0.0.1:53");
        assert_eq!(config.tls_proxy.upstream_port, 8443);
        assert!(config.bad_proxy.enabled);
    }

    #[test]
    fn test_bad_address_rejected_at_parse() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [iptables]
            drop_ip = ["antani"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [dns_proxy]
            blocklist = ["ooni.io"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_hex_keyword_validation() {
        assert!(validate_hex_keyword("|6f 6f 6e 69|").is_ok());
        assert!(validate_hex_keyword("ab|63|d").is_ok());
        assert!(validate_hex_keyword("|6f|x|6e|").is_ok());
        assert!(validate_hex_keyword("ooni").is_err());
        assert!(validate_hex_keyword("|6f 6f").is_err());
        assert!(validate_hex_keyword("|6g|").is_err());
        assert!(validate_hex_keyword("|6f6|").is_err());
        assert!(validate_hex_keyword("||").is_err());
    }

    #[test]
    fn test_ca_pair_must_be_complete() {
        let mut config = Config::default();
        config.bad_proxy.ca_cert = Some(PathBuf::from("ca.pem"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        config.bad_proxy.ca_key = Some(PathBuf::from("ca.key"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_policy() {
        let config: IptablesConfig = toml::from_str(
            r#"
            drop_ip = ["1.1.1.1"]
            reset_keyword = ["ooni"]
            hijack_https_to = "127.0.0.1:443"
            "#,
        )
        .unwrap();

        let policy = config.to_policy();
        assert_eq!(policy.drop_ips, vec![Ipv4Addr::new(1, 1, 1, 1)]);
        assert_eq!(policy.reset_keywords, vec!["ooni"]);
        assert_eq!(
            policy.hijack_https_to,
            Some(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 443))
        );
        assert_eq!(policy.rules().len(), 3);
    }
}
