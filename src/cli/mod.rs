//! Command-line interface for libres
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is defined in its own submodule.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::config::{Config, CONFIG_FILE};
use crate::error::Result;
use crate::output::OutputOptions;

mod demo;
mod init;
mod shell;

pub use shell::{run_session, tokenize, ShellCommand};

/// libres - library catalog with concurrent reservations
///
/// Manages books and members in memory. Reservations go through a pool of
/// workers and expire, or turn into borrows, on their own.
#[derive(Parser, Debug)]
#[command(name = "libres")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file (defaults to ./libres.toml)
    #[arg(long, global = true, env = "LIBRES_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Seed the catalog and race every member for book 1
    Demo {
        /// Only let the first N members contend
        #[arg(long)]
        members: Option<usize>,

        /// Override the claim mode: never, after, random
        #[arg(long)]
        claim: Option<String>,

        /// Override the reservation window (e.g., "500ms", "5s")
        #[arg(long)]
        window: Option<String>,
    },

    /// Interactive console reading commands from stdin
    Shell,

    /// Write a default libres.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let output = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };
        let config_path = self
            .config
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

        match self.command {
            Commands::Init { force } => init::run(&config_path, force, output),
            Commands::Demo {
                members,
                claim,
                window,
            } => {
                let mut config = load_config(&config_path)?;
                if let Some(claim) = claim {
                    config.reservations.claim.mode = claim;
                }
                if let Some(window) = window {
                    config.reservations.window = window;
                }
                config.validate()?;
                demo::run(demo::DemoOptions {
                    config,
                    members,
                    output,
                })
            }
            Commands::Shell => {
                let config = load_config(&config_path)?;
                shell::run(shell::ShellOptions {
                    config,
                    quiet: self.quiet,
                })
            }
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_or_default(path)?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Multi-threaded runtime for commands that run the reservation workers
fn runtime() -> Result<tokio::runtime::Runtime> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Ok(runtime)
}
