//! vmhalt CLI entry point.

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod cli;

/// vmhalt - shut down a provisioned VM and wait for it to stop
#[derive(Parser, Debug)]
#[command(name = "vmhalt")]
#[command(about = "Shut down a provisioned VM and wait for it to stop")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Shut down a VM and wait until it has stopped.
    Stop(cli::stop::StopCmd),

    /// Inspect step configuration.
    #[command(subcommand)]
    Config(cli::config::ConfigCmd),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging based on RUST_LOG or default to warn
    init_logging();

    tracing::debug!(version = vmhalt::VERSION, "starting vmhalt");

    // Ctrl-C cancels the running step
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    let result = match cli.command {
        Commands::Stop(cmd) => cmd.run(cancel).await,
        Commands::Config(cmd) => cmd.run(),
    };

    if let Err(e) = result {
        if let Some(message) = exit_message(&e) {
            tracing::error!(error = %e, "command failed");
            eprintln!("{}", message);
        }
        std::process::exit(1);
    }
}

/// Message printed on exit, or None if the error was already reported.
///
/// A halted step has logged its error and shown it through the UI.
fn exit_message(err: &vmhalt::Error) -> Option<String> {
    match err {
        vmhalt::Error::Halted(_) => None,
        other => Some(format!("Error: {}", other)),
    }
}

/// Initialize the tracing subscriber.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vmhalt=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halted_step_is_not_reported_twice() {
        let halted: vmhalt::Error = vmhalt::ShutdownError::Cancelled.into();
        assert_eq!(exit_message(&halted), None);

        let load = vmhalt::Error::ConfigLoad("shutdown.toml: missing".into());
        assert_eq!(
            exit_message(&load).as_deref(),
            Some("Error: failed to load config: shutdown.toml: missing")
        );
    }
}
