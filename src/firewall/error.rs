//! Error types for firewall operations.

use thiserror::Error;

/// Errors raised while installing firewall rules.
#[derive(Debug, Error)]
pub enum FirewallError {
    /// The firewall tool could not be executed at all.
    #[error("Failed to run '{cmd}': {source}")]
    CommandFailed {
        /// The command that failed.
        cmd: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The firewall tool ran and reported failure.
    #[error("Command '{cmd}' failed: {stderr}")]
    CommandError {
        /// The command that failed.
        cmd: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Packet filtering is not available on this platform.
    #[error("Packet filtering is only supported on Linux")]
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_display() {
        let err = FirewallError::CommandError {
            cmd: "iptables -t filter -N CENSORBOX_INPUT".to_string(),
            stderr: "Chain already exists.".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("CENSORBOX_INPUT"));
        assert!(msg.contains("Chain already exists."));
    }

    #[test]
    fn test_command_failed_keeps_source() {
        use std::error::Error;

        let err = FirewallError::CommandFailed {
            cmd: "iptables".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.source().is_some());
    }
}
