//! SSH command transport
//!
//! One [`SshSession`] wraps an OpenSSH connection to a route-server host,
//! multiplexed through a control master so that repeated commands reuse the
//! authenticated connection:
//!
//! - `ControlMaster auto`
//! - `ControlPath /tmp/.ssh-%r@%h:%p`
//! - `ControlPersist 10m`
//! - `BatchMode yes`
//!
//! The destination must be resolvable through `~/.ssh/config` without an
//! interactive password prompt.

use std::process::Stdio;
use std::string::FromUtf8Error;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Transport errors surfaced by [`SshSession`].
#[derive(Debug, Error)]
pub enum SshError {
    /// Error while establishing the connection.
    #[error("error while establishing the connection: {0}")]
    Setup(String),
    /// Command did not complete within the deadline.
    #[error("timeout while executing a remote command")]
    Timeout,
    /// I/O error while talking to the ssh client.
    #[error("ssh client error: {0}")]
    Client(#[from] std::io::Error),
    /// Remote command exited with a non-zero status.
    #[error("non-zero exit code of command `{command}` on {host}: {code}")]
    Command {
        host: String,
        command: String,
        code: i32,
    },
    /// Command output was not valid UTF-8.
    #[error("cannot parse output as UTF-8: {0}")]
    FromUtf8(#[from] FromUtf8Error),
}

impl SshError {
    /// Whether this is a transport-level failure that warrants
    /// re-establishing the session. Command-level failures (non-zero exit,
    /// undecodable output) leave the session usable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SshError::Setup(_) | SshError::Timeout | SshError::Client(_)
        )
    }
}

/// An SSH session with one remote host.
#[derive(Debug, Clone)]
pub struct SshSession {
    destination: String,
}

impl SshSession {
    /// Open a session and verify it with a round-trip `echo`. The timeout
    /// covers the whole handshake.
    pub async fn connect(
        destination: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, SshError> {
        let this = Self {
            destination: destination.into(),
        };
        trace!(host = %this.destination, "connecting");

        match timeout(connect_timeout, this.run("echo test")).await {
            Ok(Ok(stdout)) if stdout.trim() == "test" => {
                trace!(host = %this.destination, "connection established");
                Ok(this)
            }
            Ok(Ok(stdout)) => {
                warn!(host = %this.destination, %stdout, "unexpected handshake output");
                Err(SshError::Setup(format!(
                    "expected `test`, but got {stdout}"
                )))
            }
            Ok(Err(e)) => {
                warn!(host = %this.destination, error = %e, "connection failed");
                Err(e)
            }
            Err(_) => {
                warn!(host = %this.destination, "connection timeout");
                Err(SshError::Timeout)
            }
        }
    }

    /// Hostname of the session.
    pub fn host(&self) -> &str {
        &self.destination
    }

    /// Execute a shell command on the remote host and return its stdout.
    /// Fails with [`SshError::Timeout`] when the deadline passes before the
    /// command completes.
    pub async fn execute(
        &self,
        command: &str,
        command_timeout: Duration,
    ) -> Result<String, SshError> {
        match timeout(command_timeout, self.run(command)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(host = %self.destination, command, "remote command timed out");
                Err(SshError::Timeout)
            }
        }
    }

    async fn run(&self, command: &str) -> Result<String, SshError> {
        debug!(host = %self.destination, command, "executing remote command");

        let output = self
            .raw_command()
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or_default();
            warn!(
                host = %self.destination,
                command,
                code,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "remote command failed"
            );
            return Err(SshError::Command {
                host: self.destination.clone(),
                command: command.to_string(),
                code,
            });
        }

        Ok(String::from_utf8(output.stdout)?)
    }

    /// Raw `ssh` invocation with the control-master attributes set and
    /// `kill_on_drop` so an abandoned command does not outlive its caller.
    fn raw_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-oControlMaster=auto")
            .arg("-oControlPath=/tmp/.ssh-%r@%h:%p")
            .arg("-oControlPersist=10m")
            .arg("-oBatchMode=yes")
            .arg(&self.destination)
            .kill_on_drop(true);
        cmd
    }
}

// =============================================================================
// Tests
// =============================================================================
