//! Command execution boundary
//!
//! The node is driven through `bitcoin-cli`: one process per request, stdout
//! and stderr captured. [`CommandRunner`] is the seam tests replace.

use bitcoin::Network;
use std::io;
use std::path::PathBuf;
use std::process::Command;

/// Captured result of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exited with status 0
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Executes one node command and captures its output.
///
/// `args` are the request arguments only (optional `-rpcwallet=`, method,
/// params); connection arguments are the runner's business.
pub trait CommandRunner {
    fn run(&self, args: &[String]) -> io::Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, args: &[String]) -> io::Result<CommandOutput> {
        (**self).run(args)
    }
}

/// Connection settings for `bitcoin-cli`.
#[derive(Debug, Clone)]
pub struct CliSettings {
    /// Path or name of the `bitcoin-cli` binary
    pub program: PathBuf,
    pub host: String,
    pub port: u16,
    pub rpc_user: String,
    pub rpc_password: String,
    pub network: Network,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("bitcoin-cli"),
            host: "127.0.0.1".to_string(),
            port: 18443,
            rpc_user: "user".to_string(),
            rpc_password: "pass".to_string(),
            network: Network::Regtest,
        }
    }
}

/// Production runner: spawns `bitcoin-cli` for every request.
#[derive(Debug, Clone)]
pub struct BitcoinCli {
    settings: CliSettings,
}

impl BitcoinCli {
    pub fn new(settings: CliSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CliSettings {
        &self.settings
    }

    /// Arguments placed before every request.
    pub fn connection_args(&self) -> Vec<String> {
        vec![
            format!("-chain={}", self.settings.network.to_core_arg()),
            format!("-rpcconnect={}", self.settings.host),
            format!("-rpcport={}", self.settings.port),
            format!("-rpcuser={}", self.settings.rpc_user),
            format!("-rpcpassword={}", self.settings.rpc_password),
        ]
    }
}

impl CommandRunner for BitcoinCli {
    fn run(&self, args: &[String]) -> io::Result<CommandOutput> {
        let output = Command::new(&self.settings.program)
            .args(self.connection_args())
            .args(args)
            .output()?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_args() {
        let cli = BitcoinCli::new(CliSettings::default());
        assert_eq!(
            cli.connection_args(),
            vec![
                "-chain=regtest",
                "-rpcconnect=127.0.0.1",
                "-rpcport=18443",
                "-rpcuser=user",
                "-rpcpassword=pass",
            ]
        );
    }

    #[test]
    fn test_missing_binary_is_io_error() {
        let cli = BitcoinCli::new(CliSettings {
            program: PathBuf::from("/nonexistent/bitcoin-cli-regmsig"),
            ..CliSettings::default()
        });
        let err = cli.run(&["getblockchaininfo".to_string()]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
