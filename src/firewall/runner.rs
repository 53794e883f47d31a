//! Execution of firewall steps.

use super::error::FirewallError;
use std::process::Command;
use tracing::debug;

/// Runs one `iptables` invocation.
pub trait CommandRunner: Send + Sync {
    /// Execute `iptables` with `args`.
    fn run(&self, args: &[String]) -> Result<(), FirewallError>;
}

/// Runner that shells out to the real `iptables` binary.
#[derive(Debug, Clone)]
pub struct Iptables {
    program: String,
}

impl Iptables {
    /// Use `iptables` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("iptables")
    }

    /// Use a specific binary (for example `iptables-legacy`).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Iptables {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for Iptables {
    fn run(&self, args: &[String]) -> Result<(), FirewallError> {
        let cmd_str = format!("{} {}", self.program, args.join(" "));
        debug!("Running: {}", cmd_str);

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| FirewallError::CommandFailed {
                cmd: cmd_str.clone(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(FirewallError::CommandError {
                cmd: cmd_str,
                stderr,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_reports_command_failed() {
        let runner = Iptables::with_program("/nonexistent/iptables");
        let result = runner.run(&["-L".to_string()]);
        assert!(matches!(result, Err(FirewallError::CommandFailed { .. })));
    }

    #[test]
    fn test_failing_binary_reports_stderr() {
        // `false` exits non-zero without touching the firewall.
        let runner = Iptables::with_program("false");
        let result = runner.run(&[]);
        assert!(matches!(result, Err(FirewallError::CommandError { .. })));
    }
}
