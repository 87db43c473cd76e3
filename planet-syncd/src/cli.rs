use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "planet-syncd")]
#[command(version, about = "Keeps the overlay planet file in sync with its upstream")]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "/etc/planet-syncd/planet-syncd.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the sync loop in the foreground (default)
    Run,
    /// Print the state of this daemon's unit and of the overlay service
    Status,
    /// Install and start a systemd unit running this daemon
    Install,
    /// Stop and remove the systemd unit
    Uninstall,
    /// Start the installed unit
    Start,
    /// Stop the installed unit
    Stop,
    /// Restart the installed unit if it is running
    Restart,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}
