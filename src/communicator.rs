//! Remote command execution inside the guest.
//!
//! This module provides the [`Communicator`] abstraction and an SSH-backed
//! implementation that shells out to the system `ssh` client.

use crate::error::{Error, Result};
use crate::ui::Ui;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;

/// Default SSH port.
const DEFAULT_SSH_PORT: u16 = 22;

/// Exit status ssh uses for its own errors, including a dropped session.
const SSH_ERROR_STATUS: i32 = 255;

/// ssh diagnostics that mean the command never reached the guest.
///
/// Any other 255 exit is a session dropped after delivery, which is what a
/// guest shutting itself down looks like.
const SSH_CONNECT_FAILURES: &[&str] = &[
    "Could not resolve hostname",
    "Connection refused",
    "Connection timed out",
    "Operation timed out",
    "No route to host",
    "Network is unreachable",
    "Permission denied",
    "Host key verification failed",
    "kex_exchange_identification",
    "ssh: connect to host",
];

/// Channel for running commands in the guest.
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Run a command to completion and return its output.
    ///
    /// An `Err` means the command could not be delivered. A command that ran
    /// and failed is reported through [`RemoteOutput::exit_status`].
    async fn run(&self, cmd: &RemoteCmd) -> Result<RemoteOutput>;
}

/// A command to run in the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCmd {
    /// Shell command line.
    pub command: String,
}

/// Result of a command that ran in the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    /// Exit status of the command.
    pub exit_status: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RemoteOutput {
    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

impl RemoteCmd {
    /// Create a command from a shell command line.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Run the command and forward its output to the UI.
    ///
    /// stdout lines go to [`Ui::say`], stderr lines to [`Ui::error`]. A
    /// non-zero exit status becomes [`Error::CommandExit`].
    pub async fn run_with_ui(&self, comm: &dyn Communicator, ui: &dyn Ui) -> Result<()> {
        let output = comm.run(self).await?;

        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            ui.say(line);
        }
        for line in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
            ui.error(line);
        }

        if !output.success() {
            return Err(Error::command_exit(&self.command, output.exit_status));
        }
        Ok(())
    }
}

/// Communicator that runs commands over `ssh`.
#[derive(Debug, Clone)]
pub struct SshCommunicator {
    /// Guest host name or address.
    pub host: String,
    /// Login user (None = ssh default).
    pub user: Option<String>,
    /// SSH port.
    pub port: u16,
    /// Private key file.
    pub identity: Option<PathBuf>,
    /// ssh client binary.
    pub program: PathBuf,
}

impl SshCommunicator {
    /// Create a communicator for `host` on the default port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: DEFAULT_SSH_PORT,
            identity: None,
            program: PathBuf::from("ssh"),
        }
    }

    /// Set the login user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the private key file.
    pub fn with_identity(mut self, identity: impl Into<PathBuf>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Use a different ssh client binary.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// The `user@host` destination.
    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Arguments passed to `ssh` for `command`.
    fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(identity) = &self.identity {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args.push(self.destination());
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl Communicator for SshCommunicator {
    async fn run(&self, cmd: &RemoteCmd) -> Result<RemoteOutput> {
        tracing::debug!(host = %self.host, port = self.port, command = %cmd.command, "running remote command");

        let output = tokio::process::Command::new(&self.program)
            .args(self.ssh_args(&cmd.command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::communicator(format!("failed to run ssh: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_status = match output.status.code() {
            Some(SSH_ERROR_STATUS) if never_connected(&stderr) => {
                return Err(Error::communicator(format!(
                    "ssh to {} failed: {}",
                    self.destination(),
                    stderr.trim()
                )));
            }
            Some(SSH_ERROR_STATUS) => {
                tracing::debug!(host = %self.host, stderr = %stderr.trim(), "ssh session closed after command was sent");
                0
            }
            Some(code) => code,
            None => -1,
        };

        Ok(RemoteOutput {
            exit_status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: stderr.to_string(),
        })
    }
}

/// Whether ssh's stderr shows it failed before delivering the command.
fn never_connected(stderr: &str) -> bool {
    SSH_CONNECT_FAILURES.iter().any(|marker| stderr.contains(marker))
}
