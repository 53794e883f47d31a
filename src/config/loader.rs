//! Configuration loading with layered merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into binary)
//! 2. Config file (via `--config` flag)
//! 3. CLI flags (highest priority)
//!
//! Lists (block keywords, drop IPs) are **merged** (appended).
//! Scalars (addresses, hijack targets) are **overridden**.

use std::fs;
use std::path::Path;

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;
use crate::cli::Cli;

/// Configuration loader.
#[derive(Debug, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Create a new ConfigLoader.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Load, merge and validate configuration.
    ///
    /// A config file named on the command line must exist. Invalid TOML is
    /// an error (fail fast with clear message).
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = match cli.config {
            Some(ref path) => match self.load_file(path)? {
                Some(config) => {
                    debug!("Loaded config from {:?}", path);
                    config
                }
                None => {
                    return Err(ConfigError::ReadError {
                        path: path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            },
            None => {
                debug!("No config file given, using embedded defaults");
                Config::default()
            }
        };

        apply_cli(&mut config, cli);
        config.validate()?;

        Ok(config)
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

/// Layer command-line flags over `config`.
fn apply_cli(config: &mut Config, cli: &Cli) {
    fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
        if let Some(v) = value {
            *slot = v.clone();
        }
    }

    if let Some(ref tag) = cli.tag {
        config.general.tag = tag.clone();
    }

    let upstream = &mut config.upstream;
    set(&mut upstream.resolver_address, &cli.uncensored_resolver);
    set(
        &mut upstream.resolver_tls_name,
        &cli.uncensored_resolver_tls_name,
    );

    let bad = &mut config.bad_proxy;
    set(&mut bad.address, &cli.bad_proxy_address);
    set(&mut bad.tls_address, &cli.bad_proxy_address_tls);
    if let Some(ref path) = cli.bad_proxy_tls_output_ca {
        bad.tls_output_ca = Some(path.clone());
    }

    let dns = &mut config.dns_proxy;
    set(&mut dns.address, &cli.dns_proxy_address);
    dns.block.extend(cli.dns_proxy_block.iter().cloned());
    dns.hijack.extend(cli.dns_proxy_hijack.iter().cloned());
    dns.ignore.extend(cli.dns_proxy_ignore.iter().cloned());

    let http = &mut config.http_proxy;
    set(&mut http.address, &cli.http_proxy_address);
    http.block.extend(cli.http_proxy_block.iter().cloned());

    let tls = &mut config.tls_proxy;
    set(&mut tls.address, &cli.tls_proxy_address);
    tls.block.extend(cli.tls_proxy_block.iter().cloned());

    let ipt = &mut config.iptables;
    if cli.no_iptables {
        ipt.enabled = false;
    }
    ipt.drop_ip.extend(cli.iptables_drop_ip.iter().copied());
    ipt.drop_keyword
        .extend(cli.iptables_drop_keyword.iter().cloned());
    ipt.drop_keyword_hex
        .extend(cli.iptables_drop_keyword_hex.iter().cloned());
    ipt.reset_ip.extend(cli.iptables_reset_ip.iter().copied());
    ipt.reset_keyword
        .extend(cli.iptables_reset_keyword.iter().cloned());
    ipt.reset_keyword_hex
        .extend(cli.iptables_reset_keyword_hex.iter().cloned());
    if cli.iptables_hijack_dns_to.is_some() {
        ipt.hijack_dns_to = cli.iptables_hijack_dns_to;
    }
    if cli.iptables_hijack_https_to.is_some() {
        ipt.hijack_https_to = cli.iptables_hijack_https_to;
    }
    if cli.iptables_hijack_http_to.is_some() {
        ipt.hijack_http_to = cli.iptables_hijack_http_to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults_without_file() {
        let cli = Cli::parse_from(["censorbox"]);
        let config = ConfigLoader::new().load(&cli).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/censorbox.toml")),
            ..Default::default()
        };
        let result = ConfigLoader::new().load(&cli);
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[dns_proxy\nblock = ").unwrap();

        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        let result = ConfigLoader::new().load(&cli);
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_cli_lists_append_and_scalars_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [general]
            tag = "from-file"

            [dns_proxy]
            address = "127.0.0.1:5353"
            block = ["ooni.io"]

            [iptables]
            hijack_dns_to = "127.0.0.1:5353"
            "#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "censorbox",
            "--config",
            path.to_str().unwrap(),
            "--tag",
            "from-cli",
            "--dns-proxy-block",
            "twitter.com",
            "--iptables-hijack-dns-to",
            "127.0.0.1:53",
        ]);
        let config = ConfigLoader::new().load(&cli).unwrap();

        assert_eq!(config.general.tag, "from-cli");
        assert_eq!(config.dns_proxy.block, vec!["ooni.io", "twitter.com"]);
        // Not overridden on the command line.
        assert_eq!(config.dns_proxy.address.to_string(), "127.0.0.1:5353");
        assert_eq!(
            config.iptables.hijack_dns_to,
            Some(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 53))
        );
    }

    #[test]
    fn test_cli_values_are_validated() {
        let cli = Cli::parse_from(["censorbox", "--iptables-reset-keyword-hex", "6f6f"]);
        let result = ConfigLoader::new().load(&cli);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_uncensored_resolver_from_file_and_cli() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [upstream]
            resolver_address = "8.8.8.8:853"
            resolver_tls_name = "dns.google"
            "#,
        )
        .unwrap();

        let from_file = Cli::parse_from(["censorbox", "--config", path.to_str().unwrap()]);
        let config = ConfigLoader::new().load(&from_file).unwrap();
        assert_eq!(config.upstream.resolver_address.to_string(), "8.8.8.8:853");
        assert_eq!(config.upstream.resolver_tls_name, "dns.google");

        let overridden = Cli::parse_from([
            "censorbox",
            "--config",
            path.to_str().unwrap(),
            "--uncensored-resolver",
            "9.9.9.9:853",
            "--uncensored-resolver-tls-name",
            "dns.quad9.net",
        ]);
        let config = ConfigLoader::new().load(&overridden).unwrap();
        assert_eq!(config.upstream.resolver_address.to_string(), "9.9.9.9:853");
        assert_eq!(config.upstream.resolver_tls_name, "dns.quad9.net");
    }

    #[test]
    fn test_uncensored_resolver_defaults_to_cloudflare() {
        let cli = Cli::parse_from(["censorbox"]);
        let config = ConfigLoader::new().load(&cli).unwrap();
        assert_eq!(config.upstream.resolver_address.to_string(), "1.1.1.1:853");
        assert_eq!(config.upstream.resolver_tls_name, "cloudflare-dns.com");
    }

    #[test]
    fn test_empty_resolver_tls_name_rejected() {
        let cli = Cli::parse_from(["censorbox", "--uncensored-resolver-tls-name", " "]);
        let result = ConfigLoader::new().load(&cli);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_no_iptables_flag() {
        let cli = Cli::parse_from(["censorbox", "--no-iptables"]);
        let config = ConfigLoader::new().load(&cli).unwrap();
        assert!(!config.iptables.enabled);
    }
}
