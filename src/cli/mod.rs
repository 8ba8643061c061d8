//! Command-line interface

pub mod output;
pub mod reporter;

use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Bootstrap the panel stack on a host without an init system
#[derive(Debug, Parser, Clone)]
#[command(name = "stackup")]
#[command(author = "stackup contributors")]
#[command(version = "0.1.0")]
#[command(about = "Provision and start the panel service stack", long_about = None)]
pub struct Cli {
    /// Optional subcommand; with none, the full stack is provisioned
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a stack configuration file (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Provision the whole stack (the default)
    Up,

    /// Print the host address and run the agent daemon in the foreground
    Agent,
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    /// The command to run, defaulting to a full provisioning run
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Up)
    }
}
