//! External command execution
//!
//! Every call to kubectl, helm or openssl goes through [`CommandRunner`] so the
//! pipeline can be exercised in tests without any of those tools installed.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::debug;

use crate::params::redact_arg;
use crate::{Error, Result};

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Raw standard output
    pub stdout: Vec<u8>,
    /// Raw standard error
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Output holding the given stdout only
    pub fn from_stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Stdout decoded lossily as UTF-8
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs external programs to completion
///
/// A non-zero exit status is reported as [`Error::Execution`]; callers never
/// have to inspect the status themselves.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and extra environment variables `env`
    async fn run(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by real processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<CommandOutput> {
        debug!(command = %display_command(program, args), "running");

        let output = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .await
            .map_err(|e| Error::execution(program, None, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                "exited unsuccessfully".to_string()
            } else {
                stderr
            };
            return Err(Error::execution(program, output.status.code(), message));
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Convert a list of string-like items into owned arguments
pub fn to_args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Command line suitable for logs, with secret values redacted
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&redact_arg(arg));
    }
    line
}
