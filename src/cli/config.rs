//! Configuration CLI commands.

use clap::{Args, Subcommand};
use std::path::PathBuf;
use vmhalt::{Error, Result, StepConfig};

/// Configuration commands
#[derive(Subcommand, Debug)]
pub enum ConfigCmd {
    /// Show the effective step configuration
    Show(ShowCmd),

    /// Print the default config file path
    Path,
}

impl ConfigCmd {
    pub fn run(self) -> Result<()> {
        match self {
            ConfigCmd::Show(cmd) => cmd.run(),
            ConfigCmd::Path => {
                println!("{}", StepConfig::default_path()?.display());
                Ok(())
            }
        }
    }
}

/// Show the effective step configuration
#[derive(Args, Debug)]
pub struct ShowCmd {
    /// Config file to show instead of the default one.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl ShowCmd {
    pub fn run(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => StepConfig::load_from(path)?,
            None => StepConfig::load()?,
        };

        println!("Shutdown mode: {}", config.mode());
        println!();
        let text = toml::to_string_pretty(&config).map_err(|e| Error::config(e.to_string()))?;
        print!("{}", text);
        Ok(())
    }
}
