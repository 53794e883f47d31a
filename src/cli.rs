//! Command-line interface definitions for censorbox.
//!
//! Uses clap's derive API for type-safe argument parsing. Every flag has a
//! counterpart in the TOML configuration; flags win over the file.

use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;

/// Internet censorship simulator.
///
/// censorbox runs a censoring DNS resolver, HTTP proxy and TLS proxy, a
/// misbehaving middlebox, and iptables rules that drop, reset or redirect
/// traffic, so network measurement tools can be tested against known
/// censorship techniques.
#[derive(Parser, Debug, Default)]
#[command(name = "censorbox")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Tag attached to every audit event of this run.
    #[arg(long = "tag", value_name = "TAG")]
    pub tag: Option<String>,

    /// Print the iptables commands that would be run and exit.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Do not touch iptables.
    #[arg(long = "no-iptables")]
    pub no_iptables: bool,

    /// Address where the bad proxy listens.
    #[arg(long = "bad-proxy-address", value_name = "ADDR")]
    pub bad_proxy_address: Option<SocketAddr>,

    /// Address where the bad proxy listens for TLS connections.
    #[arg(long = "bad-proxy-address-tls", value_name = "ADDR")]
    pub bad_proxy_address_tls: Option<SocketAddr>,

    /// File where to write the bad proxy CA certificate.
    #[arg(long = "bad-proxy-tls-output-ca", value_name = "PATH")]
    pub bad_proxy_tls_output_ca: Option<PathBuf>,

    /// Address where the DNS proxy listens.
    #[arg(long = "dns-proxy-address", value_name = "ADDR")]
    pub dns_proxy_address: Option<SocketAddr>,

    /// Answer NXDOMAIN for names containing this keyword (repeatable).
    #[arg(long = "dns-proxy-block", value_name = "KEYWORD")]
    pub dns_proxy_block: Vec<String>,

    /// Answer 127.0.0.1 for names containing this keyword (repeatable).
    #[arg(long = "dns-proxy-hijack", value_name = "KEYWORD")]
    pub dns_proxy_hijack: Vec<String>,

    /// Never answer names containing this keyword (repeatable).
    #[arg(long = "dns-proxy-ignore", value_name = "KEYWORD")]
    pub dns_proxy_ignore: Vec<String>,

    /// Address where the HTTP proxy listens.
    #[arg(long = "http-proxy-address", value_name = "ADDR")]
    pub http_proxy_address: Option<SocketAddr>,

    /// Answer 451 for hosts containing this keyword (repeatable).
    #[arg(long = "http-proxy-block", value_name = "KEYWORD")]
    pub http_proxy_block: Vec<String>,

    /// Drop traffic to this IP (repeatable).
    #[arg(long = "iptables-drop-ip", value_name = "IP")]
    pub iptables_drop_ip: Vec<Ipv4Addr>,

    /// Drop traffic containing this hex keyword, e.g. '|6f 6f 6e 69|' (repeatable).
    #[arg(long = "iptables-drop-keyword-hex", value_name = "HEX")]
    pub iptables_drop_keyword_hex: Vec<String>,

    /// Drop traffic containing this keyword (repeatable).
    #[arg(long = "iptables-drop-keyword", value_name = "KEYWORD")]
    pub iptables_drop_keyword: Vec<String>,

    /// Redirect DNS traffic to this address.
    #[arg(long = "iptables-hijack-dns-to", value_name = "ADDR")]
    pub iptables_hijack_dns_to: Option<SocketAddrV4>,

    /// Redirect HTTPS traffic to this address.
    #[arg(long = "iptables-hijack-https-to", value_name = "ADDR")]
    pub iptables_hijack_https_to: Option<SocketAddrV4>,

    /// Redirect HTTP traffic to this address.
    #[arg(long = "iptables-hijack-http-to", value_name = "ADDR")]
    pub iptables_hijack_http_to: Option<SocketAddrV4>,

    /// Reset TCP traffic to this IP (repeatable).
    #[arg(long = "iptables-reset-ip", value_name = "IP")]
    pub iptables_reset_ip: Vec<Ipv4Addr>,

    /// Reset TCP traffic containing this hex keyword (repeatable).
    #[arg(long = "iptables-reset-keyword-hex", value_name = "HEX")]
    pub iptables_reset_keyword_hex: Vec<String>,

    /// Reset TCP traffic containing this keyword (repeatable).
    #[arg(long = "iptables-reset-keyword", value_name = "KEYWORD")]
    pub iptables_reset_keyword: Vec<String>,

    /// DNS-over-TLS server for names the DNS proxy forwards.
    #[arg(long = "uncensored-resolver", value_name = "ADDR")]
    pub uncensored_resolver: Option<SocketAddr>,

    /// TLS name the uncensored resolver's certificate must carry.
    #[arg(long = "uncensored-resolver-tls-name", value_name = "NAME")]
    pub uncensored_resolver_tls_name: Option<String>,

    /// Address where the TLS proxy listens.
    #[arg(long = "tls-proxy-address", value_name = "ADDR")]
    pub tls_proxy_address: Option<SocketAddr>,

    /// Answer with an alert for SNIs containing this keyword (repeatable).
    #[arg(long = "tls-proxy-block", value_name = "KEYWORD")]
    pub tls_proxy_block: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_args() {
        let cli = Cli::parse_from(["censorbox"]);
        assert!(cli.config.is_none());
        assert_eq!(cli.verbose, 0);
        assert!(!cli.dry_run);
        assert!(cli.dns_proxy_block.is_empty());
    }

    #[test]
    fn test_repeatable_flags() {
        let cli = Cli::parse_from([
            "censorbox",
            "--dns-proxy-block",
            "ooni.io",
            "--dns-proxy-block",
            "twitter.com",
            "--tls-proxy-block",
            "ooni",
            "--iptables-drop-ip",
            "1.1.1.1",
            "--iptables-drop-keyword-hex",
            "|6f 6f 6e 69|",
        ]);
        assert_eq!(cli.dns_proxy_block, vec!["ooni.io", "twitter.com"]);
        assert_eq!(cli.tls_proxy_block, vec!["ooni"]);
        assert_eq!(cli.iptables_drop_ip, vec![Ipv4Addr::new(1, 1, 1, 1)]);
        assert_eq!(cli.iptables_drop_keyword_hex, vec!["|6f 6f 6e 69|"]);
    }

    #[test]
    fn test_typed_addresses() {
        let cli = Cli::parse_from([
            "censorbox",
            "--iptables-hijack-dns-to",
            "127.0.0.1:53",
            "--bad-proxy-address-tls",
            "127.0.0.1:4114",
        ]);
        assert_eq!(
            cli.iptables_hijack_dns_to,
            Some(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 53))
        );
        assert_eq!(
            cli.bad_proxy_address_tls,
            Some(SocketAddr::from(([127, 0, 0, 1], 4114)))
        );
    }

    #[test]
    fn test_invalid_ip_rejected() {
        let result = Cli::try_parse_from(["censorbox", "--iptables-drop-ip", "antani"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_uncensored_resolver_flags() {
        let cli = Cli::parse_from([
            "censorbox",
            "--uncensored-resolver",
            "9.9.9.9:853",
            "--uncensored-resolver-tls-name",
            "dns.quad9.net",
        ]);
        assert_eq!(
            cli.uncensored_resolver,
            Some(SocketAddr::from(([9, 9, 9, 9], 853)))
        );
        assert_eq!(cli.uncensored_resolver_tls_name.as_deref(), Some("dns.quad9.net"));
    }

    #[test]
    fn test_verbose_count() {
        let cli = Cli::parse_from(["censorbox", "-vvv", "--dry-run"]);
        assert_eq!(cli.verbose, 3);
        assert!(cli.dry_run);
    }
}
