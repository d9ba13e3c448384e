// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `ephemera generate`: run one generation through the state manager and
//! print the produced secret data.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use ephemera_core::application::state_manager::{GenerateRequest, GeneratorStateManager};
use ephemera_core::domain::clock::SystemClock;
use ephemera_core::domain::context::OperationContext;
use ephemera_core::domain::generator::{GeneratorResource, SecretData};
use ephemera_core::infrastructure::resources::InMemoryResourceAccessor;

use crate::bootstrap::{self, Runtime};

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Generator resource manifest (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,

    /// Namespace the credential belongs to
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Object that consumes the credential
    #[arg(long)]
    pub owner: String,

    /// Slot within the owner; a new generation retires the previous one
    #[arg(long, default_value = "default")]
    pub key: String,

    /// Lifetime of the recorded state (e.g. "1h", "30m")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub ttl: Option<Duration>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: GenerateArgs, config_path: Option<PathBuf>) -> Result<()> {
    let resource = read_resource(&args.file)?;
    let config = bootstrap::load_config(config_path)?;
    let runtime = Runtime::build(config).await?;
    if !runtime.durable {
        warn!("In-memory store selected: the generated state will not be tracked after exit");
    }

    let manager = GeneratorStateManager::new(
        runtime.repository.clone(),
        runtime.registry.clone(),
        Arc::new(InMemoryResourceAccessor::new()),
        Arc::new(SystemClock),
        runtime.config.spec.state_manager.gc_grace_period,
    );

    let request = GenerateRequest {
        namespace: args.namespace,
        owner: args.owner,
        state_key: args.key,
        resource,
        ttl: args.ttl,
    };
    let ctx = OperationContext::background()
        .child(Some(runtime.config.spec.controller.operation_timeout));
    let outcome = manager
        .generate(&ctx, &request)
        .await
        .context("Generation failed")?;

    let data = printable(&outcome.data);
    if args.json {
        let body = serde_json::json!({
            "data": data,
            "state": outcome.state.as_ref().map(|s| s.key().to_string()),
            "retired": outcome.retired,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    match &outcome.state {
        Some(state) => println!(
            "{}",
            format!("✓ Generated; state recorded as {}", state.key()).green()
        ),
        None => println!("{}", "✓ Generated (stateless, nothing to clean up)".green()),
    }
    if outcome.retired > 0 {
        println!("  Retired {} previous generation(s)", outcome.retired);
    }
    println!();
    print!("{}", serde_yaml::to_string(&data)?);
    Ok(())
}

fn read_resource(path: &Path) -> Result<GeneratorResource> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read generator manifest {:?}", path))?;
    let resource: GeneratorResource = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse generator manifest {:?}", path))?;
    if resource.kind.trim().is_empty() {
        anyhow::bail!("Generator manifest {:?} has no kind", path);
    }
    Ok(resource)
}

/// Secret values are bytes; show them as text.
fn printable(data: &SecretData) -> BTreeMap<String, String> {
    data.iter()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
        .collect()
}
