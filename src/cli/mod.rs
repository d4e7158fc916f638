//! CLI module for BI Agent
//!
//! Provides commands:
//! - `chat`: interactive session with approvals and inline flows (default)
//! - `history`: recent approval audit records
//! - `config`: effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;

pub mod chat;
pub mod config;
pub mod history;

/// BI Agent CLI
#[derive(Parser, Debug)]
#[command(name = "bi-agent")]
#[command(about = "Terminal BI agent with human-in-the-loop approvals")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive session (default)
    Chat,
    /// Show recent approval audit records
    History {
        /// Number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to this file
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Chat) | None => chat::run(config).await,
        Some(Commands::History { limit }) => history::run(&config, limit).await,
        Some(Commands::Config { write }) => config::run(&config, write.as_deref()),
    }
}
