// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # ephemera
//!
//! The `ephemera` binary hosts the generator-state controller and the
//! operator commands around it.
//!
//! ## Commands
//!
//! - `ephemera run` - Reconcile generator states until SIGINT/SIGTERM
//! - `ephemera generate` - One-shot generation through the state manager
//! - `ephemera states list|delete|force-finalize|release` - Inspect and steer records
//! - `ephemera generators` - List generator kinds
//! - `ephemera config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use ephemera_cli::commands::{self, ConfigCommand, GenerateArgs, StatesCommand};

/// ephemera - lifecycle and garbage collection for generated credentials
#[derive(Parser)]
#[command(name = "ephemera")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "EPHEMERA_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true, env = "EPHEMERA_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the generator-state controller
    #[command(name = "run")]
    Run,

    /// Generate a credential and record its state
    #[command(name = "generate")]
    Generate(GenerateArgs),

    /// Inspect and manage generator-state records
    #[command(name = "states")]
    States {
        #[command(subcommand)]
        command: StatesCommand,
    },

    /// List generator kinds known to this binary
    #[command(name = "generators")]
    Generators,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = ephemera_cli::bootstrap::logging_settings(cli.config.clone());
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    init_logging(level, &logging.format)?;

    match cli.command {
        Some(Commands::Run) => commands::run::execute(cli.config).await,
        Some(Commands::Generate(args)) => commands::generate::execute(args, cli.config).await,
        Some(Commands::States { command }) => {
            commands::states::handle_command(command, cli.config).await
        }
        Some(Commands::Generators) => commands::generators::execute(cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().with_target(true).init(),
        _ => builder.with_target(false).compact().init(),
    }

    Ok(())
}
