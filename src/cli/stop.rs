//! Stop command implementation.

use super::parsers::{parse_duration, parse_pid};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vmhalt::{
    ConsoleUi, ProcessDriver, ShutdownContext, ShutdownStep, SshCommunicator, Step, StepConfig,
    VmId,
};

/// Shut down a VM and wait for it to stop.
#[derive(Args, Debug)]
pub struct StopCmd {
    /// VM name.
    pub name: String,

    /// PID of the VM's hypervisor process.
    #[arg(long, value_parser = parse_pid)]
    pub pid: libc::pid_t,

    /// Step configuration file (TOML).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Command run in the guest to shut it down (requires --ssh-host).
    #[arg(long, value_name = "CMD")]
    pub shutdown_command: Option<String>,

    /// How long to wait for the VM to stop (e.g. "5m").
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Grace period after the VM stopped (e.g. "2s").
    #[arg(long, value_parser = parse_duration)]
    pub post_stop_delay: Option<Duration>,

    /// Don't send a shutdown request; wait for a manual shutdown.
    #[arg(long)]
    pub disable_shutdown: bool,

    /// Guest address for the shutdown command.
    #[arg(long)]
    pub ssh_host: Option<String>,

    /// SSH login user.
    #[arg(long)]
    pub ssh_user: Option<String>,

    /// SSH port.
    #[arg(long, default_value = "22")]
    pub ssh_port: u16,

    /// SSH private key file.
    #[arg(long, value_name = "PATH")]
    pub ssh_key: Option<PathBuf>,
}

impl StopCmd {
    /// Execute the stop command.
    pub async fn run(self, cancel: CancellationToken) -> vmhalt::Result<()> {
        let config = self.step_config()?;
        tracing::debug!(?config, "resolved step config");

        let driver = ProcessDriver::new();
        let id = VmId::new(&self.name);
        driver.register(id.clone(), self.pid);

        let ui = ConsoleUi;
        let ssh = self.communicator();

        let mut ctx = ShutdownContext::new(&driver, &ui, &id).with_cancel(cancel);
        if let Some(ssh) = &ssh {
            ctx = ctx.with_communicator(ssh);
        }

        let step = ShutdownStep::new(&config);
        let action = step.run(&ctx).await;
        step.cleanup(&ctx).await;

        action.into_result()?;
        println!("Stopped VM: {}", self.name);
        Ok(())
    }

    /// Config file values with command-line flags layered on top.
    fn step_config(&self) -> vmhalt::Result<StepConfig> {
        let mut config = match &self.config {
            Some(path) => StepConfig::load_from(path)?,
            None => StepConfig::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                StepConfig::default()
            }),
        };

        if let Some(command) = &self.shutdown_command {
            config.shutdown_command = Some(command.clone());
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(delay) = self.post_stop_delay {
            config.post_stop_delay = delay;
        }
        if self.disable_shutdown {
            config.disable_shutdown = true;
        }
        Ok(config)
    }

    fn communicator(&self) -> Option<SshCommunicator> {
        let host = self.ssh_host.as_ref()?;
        let mut ssh = SshCommunicator::new(host.as_str()).with_port(self.ssh_port);
        if let Some(user) = &self.ssh_user {
            ssh = ssh.with_user(user.as_str());
        }
        if let Some(key) = &self.ssh_key {
            ssh = ssh.with_identity(key);
        }
        Some(ssh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        stop: StopCmd,
    }

    fn parse(args: &[&str]) -> StopCmd {
        TestCli::try_parse_from(std::iter::once("vmhalt").chain(args.iter().copied()))
            .unwrap()
            .stop
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shutdown.toml");
        std::fs::write(
            &path,
            "shutdown_command = \"poweroff\"\ntimeout = \"10m\"\npost_stop_delay = \"1s\"\n",
        )
        .unwrap();
        let path_arg = path.to_string_lossy().to_string();

        let cmd = parse(&[
            "build-vm",
            "--pid",
            "4242",
            "--config",
            &path_arg,
            "--timeout",
            "30s",
        ]);
        let config = cmd.step_config().unwrap();

        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.post_stop_delay, Duration::from_secs(1));
        assert_eq!(config.shutdown_command.as_deref(), Some("poweroff"));
        assert!(!config.disable_shutdown);
    }

    #[test]
    fn test_communicator_requires_host() {
        let cmd = parse(&["build-vm", "--pid", "1"]);
        assert!(cmd.communicator().is_none());

        let cmd = parse(&[
            "build-vm",
            "--pid",
            "1",
            "--ssh-host",
            "10.0.0.5",
            "--ssh-user",
            "packer",
            "--ssh-port",
            "2222",
        ]);
        let ssh = cmd.communicator().unwrap();
        assert_eq!(ssh.host, "10.0.0.5");
        assert_eq!(ssh.user.as_deref(), Some("packer"));
        assert_eq!(ssh.port, 2222);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cmd = parse(&["build-vm", "--pid", "1", "--config", "/nonexistent/shutdown.toml"]);
        assert!(matches!(
            cmd.step_config(),
            Err(vmhalt::Error::ConfigLoad(_))
        ));
    }
}
