// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use ephemera_core::domain::controller_config::{ControllerConfig, StoreConfig};

use crate::bootstrap;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./ephemera-config.yaml)
        #[arg(short, long, default_value = "./ephemera-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ControllerConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. EPHEMERA_CONFIG_PATH: {}",
            std::env::var("EPHEMERA_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./ephemera-config.yaml");
        println!("  4. ~/.ephemera/config.yaml");
        println!("  5. /etc/ephemera/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Controller:".bold());
    println!("  Name: {}", config.metadata.name);
    let controller = &config.spec.controller;
    println!("  Workers: {}", controller.workers);
    println!("  Resync interval: {:?}", controller.resync_interval);
    println!("  Operation timeout: {:?}", controller.operation_timeout);
    println!(
        "  Backoff: {:?} → {:?}",
        controller.backoff.base, controller.backoff.max
    );
    println!();

    println!("{}", "Store:".bold());
    match &config.spec.store {
        StoreConfig::Memory => {
            println!("  Type: memory {}", "(non-durable)".dimmed());
        }
        StoreConfig::Postgres {
            connection_string,
            max_connections,
        } => {
            println!("  Type: postgres");
            println!("  Connection: {}", redact(connection_string));
            println!("  Max connections: {}", max_connections);
        }
    }
    println!();

    println!("{}", "Generators:".bold());
    if config.spec.generators.disabled.is_empty() {
        println!("  Disabled: {}", "(none)".dimmed());
    } else {
        println!("  Disabled: {}", config.spec.generators.disabled.join(", "));
    }
    println!(
        "  Superseded state grace period: {:?}",
        config.spec.state_manager.gc_grace_period
    );
    println!();

    let observability = &config.spec.observability;
    println!("{}", "Observability:".bold());
    println!(
        "  Logging: {} ({})",
        observability.logging.level, observability.logging.format
    );
    if observability.metrics.enabled {
        println!("  Metrics: enabled on port {}", observability.metrics.port);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    bootstrap::load_config(config_path)?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

/// Hide the password of a connection URL; `env:` references are shown as is.
fn redact(connection_string: &str) -> String {
    if connection_string.starts_with("env:") {
        return connection_string.to_string();
    }
    let Some((scheme, rest)) = connection_string.split_once("://") else {
        return connection_string.to_string();
    };
    match rest.split_once('@') {
        Some((userinfo, host)) => {
            let user = userinfo.split(':').next().unwrap_or_default();
            format!("{}://{}:****@{}", scheme, user, host)
        }
        None => connection_string.to_string(),
    }
}
