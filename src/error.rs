//! Error types for vmhalt.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using vmhalt's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by collaborators and configuration.
#[derive(Error, Debug)]
pub enum Error {
    // Driver errors
    /// VM not known to the driver.
    #[error("vm not found: {0}")]
    VmNotFound(String),

    /// Generic driver error.
    #[error("driver error: {0}")]
    Driver(String),

    // Communicator errors
    /// The remote command could not be delivered.
    #[error("communicator error: {0}")]
    Communicator(String),

    /// The remote command ran but exited with a non-zero status.
    #[error("command exited with status {status}: {command}")]
    CommandExit {
        /// The command that ran.
        command: String,
        /// Exit status reported by the guest.
        status: i32,
    },

    // Configuration errors
    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to load configuration.
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    // Step errors
    /// The shutdown step halted.
    #[error("shutdown step halted: {0}")]
    Halted(Box<ShutdownError>),
}

impl Error {
    /// Create a driver error with a message.
    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }

    /// Create a communicator error with a message.
    pub fn communicator(msg: impl Into<String>) -> Self {
        Self::Communicator(msg.into())
    }

    /// Create a command exit error.
    pub fn command_exit(command: impl Into<String>, status: i32) -> Self {
        Self::CommandExit {
            command: command.into(),
            status,
        }
    }

    /// Create a configuration error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<ShutdownError> for Error {
    fn from(err: ShutdownError) -> Self {
        Self::Halted(Box::new(err))
    }
}

/// Terminal failures of the shutdown step.
///
/// None of these are retried; the step halts on the first one.
#[derive(Error, Debug)]
pub enum ShutdownError {
    /// The graceful shutdown command could not be sent or returned failure.
    #[error("failed to send shutdown command: {0}")]
    CommandFailed(#[source] Error),

    /// The driver rejected the forced stop request.
    #[error("error stopping VM: {0}")]
    DriverStopFailed(#[source] Error),

    /// The VM did not report stopped within the configured window.
    #[error("timeout while waiting for machine to shutdown (waited {})", format_window(.0))]
    Timeout(Duration),

    /// The surrounding pipeline requested cancellation.
    #[error("shutdown cancelled")]
    Cancelled,
}

impl ShutdownError {
    /// Short machine-readable kind, used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ShutdownError::CommandFailed(_) => "command_failed",
            ShutdownError::DriverStopFailed(_) => "driver_stop_failed",
            ShutdownError::Timeout(_) => "timeout",
            ShutdownError::Cancelled => "cancelled",
        }
    }
}

fn format_window(window: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*window)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_preserves_underlying_message() {
        let err = ShutdownError::CommandFailed(Error::communicator("connection refused"));
        let msg = err.to_string();
        assert!(msg.contains("failed to send shutdown command"));
        assert!(
            msg.contains("connection refused"),
            "Error should keep the transport message"
        );
    }

    #[test]
    fn test_driver_stop_failed_preserves_underlying_message() {
        let err = ShutdownError::DriverStopFailed(Error::VmNotFound("build-vm".into()));
        let msg = err.to_string();
        assert!(msg.contains("error stopping VM"));
        assert!(msg.contains("build-vm"), "Error should include VM name");
    }

    #[test]
    fn test_command_exit_includes_command_and_status() {
        let err = Error::command_exit("sudo poweroff", 255);
        let msg = err.to_string();
        assert!(msg.contains("sudo poweroff"));
        assert!(msg.contains("255"));
    }

    #[test]
    fn test_timeout_includes_window() {
        let err = ShutdownError::Timeout(Duration::from_secs(90));
        assert!(err.to_string().contains("1m 30s"));
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_halted_wraps_step_error() {
        let err: Error = ShutdownError::Cancelled.into();
        assert!(matches!(&err, Error::Halted(inner) if inner.kind() == "cancelled"));
        assert_eq!(err.to_string(), "shutdown step halted: shutdown cancelled");
    }

    #[test]
    fn test_source_is_exposed() {
        use std::error::Error as _;
        let err = ShutdownError::DriverStopFailed(Error::driver("busy"));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("driver error: busy"));
        assert!(ShutdownError::Cancelled.source().is_none());
    }
}
