//! mgradm CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// mgradm - Server administration for containerized deployments
#[derive(Parser, Debug)]
#[command(name = "mgradm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Print debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file
    #[arg(short, long, global = true, env = "MGRADM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Migrate a legacy server to a containerized deployment
    Migrate {
        #[command(subcommand)]
        target: commands::migrate::MigrateTarget,
    },
    /// Upgrade a containerized server
    Upgrade {
        #[command(subcommand)]
        target: commands::upgrade::UpgradeTarget,
    },
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let file = config::load_config(self.config.as_deref())?;
        match self.command {
            Commands::Migrate { target } => commands::migrate::run(target, &file).await,
            Commands::Upgrade { target } => commands::upgrade::run(target, &file).await,
        }
    }
}
