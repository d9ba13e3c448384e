// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Generator-state record commands
//!
//! Commands: list, delete, force-finalize, release

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use ephemera_core::application::state_manager::GeneratorStateManager;
use ephemera_core::domain::clock::SystemClock;
use ephemera_core::domain::condition::ConditionType;
use ephemera_core::domain::generator_state::{GeneratorState, StateKey};
use ephemera_core::infrastructure::resources::InMemoryResourceAccessor;

use crate::bootstrap::{self, Runtime};

#[derive(Subcommand)]
pub enum StatesCommand {
    /// List recorded generator states
    List {
        /// Only show records in this namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Request deletion; cleanup runs on the next reconcile
    Delete {
        /// Record to delete
        #[arg(value_name = "NAMESPACE/NAME")]
        key: StateKey,
    },

    /// Drop the finalizer without running cleanup (leaks the external credential)
    ForceFinalize {
        /// Stuck record
        #[arg(value_name = "NAMESPACE/NAME")]
        key: StateKey,

        /// Confirm that the external resource has been removed by hand
        #[arg(long)]
        yes: bool,
    },

    /// Schedule immediate garbage collection of every record of an owner
    Release {
        #[arg(short, long, default_value = "default")]
        namespace: String,

        #[arg(long)]
        owner: String,
    },
}

pub async fn handle_command(command: StatesCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = bootstrap::load_config(config_path)?;
    let runtime = Runtime::build(config).await?;

    match command {
        StatesCommand::List { namespace } => {
            runtime.require_durable("states list")?;
            list(&runtime, namespace.as_deref()).await
        }
        StatesCommand::Delete { key } => {
            runtime.require_durable("states delete")?;
            delete(&runtime, &key).await
        }
        StatesCommand::ForceFinalize { key, yes } => {
            runtime.require_durable("states force-finalize")?;
            force_finalize(&runtime, &key, yes).await
        }
        StatesCommand::Release { namespace, owner } => {
            runtime.require_durable("states release")?;
            release(&runtime, &namespace, &owner).await
        }
    }
}

async fn list(runtime: &Runtime, namespace: Option<&str>) -> Result<()> {
    let states = runtime
        .repository
        .list_all()
        .await
        .context("Failed to list generator states")?;
    let now = Utc::now();

    let rows: Vec<&GeneratorState> = states
        .iter()
        .filter(|s| namespace.map_or(true, |ns| s.metadata.namespace == ns))
        .collect();
    if rows.is_empty() {
        println!("{}", "No generator states found".dimmed());
        return Ok(());
    }

    println!(
        "{:<40} {:<10} {:<12} {:<12} {:<8} {}",
        "NAMESPACE/NAME".bold(),
        "KIND".bold(),
        "PHASE".bold(),
        "DEADLINE".bold(),
        "AGE".bold(),
        "CONDITION".bold()
    );
    for state in rows {
        println!(
            "{:<40} {:<10} {:<12} {:<12} {:<8} {}",
            state.key().to_string(),
            kind_of(state),
            state.phase().as_str(),
            state
                .spec
                .garbage_collection_deadline
                .map(|d| relative(d, now))
                .unwrap_or_else(|| "-".to_string()),
            age(state.metadata.creation_timestamp, now),
            summary(state)
        );
    }
    Ok(())
}

async fn delete(runtime: &Runtime, key: &StateKey) -> Result<()> {
    let remaining = runtime
        .repository
        .delete(key)
        .await
        .with_context(|| format!("Failed to delete {}", key))?;

    match remaining {
        Some(_) => println!(
            "{}",
            format!(
                "✓ Deletion requested for {}; cleanup runs on the next reconcile",
                key
            )
            .green()
        ),
        None => println!("{}", format!("✓ {} removed", key).green()),
    }
    Ok(())
}

async fn force_finalize(runtime: &Runtime, key: &StateKey, confirmed: bool) -> Result<()> {
    if !confirmed {
        anyhow::bail!(
            "force-finalize skips cleanup and may leak the external credential of {}. \
             Re-run with --yes once it has been removed by hand",
            key
        );
    }

    let mut state = runtime
        .repository
        .find_by_key(key)
        .await?
        .with_context(|| format!("Generator state {} not found", key))?;

    if !state.remove_finalizer() {
        println!("{}", format!("{} carries no finalizer", key).yellow());
        return Ok(());
    }
    warn!(
        namespace = %key.namespace,
        name = %key.name,
        "Finalizer removed by operator without cleanup"
    );
    runtime
        .repository
        .update(&state)
        .await
        .with_context(|| format!("Failed to update {}", key))?;

    if state.is_being_deleted() {
        println!("{}", format!("✓ {} finalized and removed", key).green());
    } else {
        println!(
            "{}",
            format!(
                "✓ Finalizer dropped from {}; the controller will re-adopt it unless it is deleted",
                key
            )
            .green()
        );
    }
    Ok(())
}

async fn release(runtime: &Runtime, namespace: &str, owner: &str) -> Result<()> {
    let manager = GeneratorStateManager::new(
        runtime.repository.clone(),
        runtime.registry.clone(),
        Arc::new(InMemoryResourceAccessor::new()),
        Arc::new(SystemClock),
        runtime.config.spec.state_manager.gc_grace_period,
    );
    let released = manager
        .release_owner(namespace, owner)
        .await
        .with_context(|| format!("Failed to release owner {}/{}", namespace, owner))?;
    println!(
        "{}",
        format!(
            "✓ {} record(s) of {}/{} scheduled for garbage collection",
            released, namespace, owner
        )
        .green()
    );
    Ok(())
}

fn kind_of(state: &GeneratorState) -> String {
    state
        .decode_resource()
        .map(|r| r.kind)
        .unwrap_or_else(|_| "?".to_string())
}

/// Most relevant condition: a failure beats scheduling beats readiness.
fn summary(state: &GeneratorState) -> String {
    let order = [
        ConditionType::Failed,
        ConditionType::Terminating,
        ConditionType::DeletionScheduled,
        ConditionType::Ready,
    ];
    order
        .iter()
        .filter_map(|t| state.condition(*t))
        .find(|c| c.is_true())
        .map(|c| format!("{}: {}", c.condition_type.as_str(), c.reason))
        .unwrap_or_else(|| "-".to_string())
}

fn age(created: DateTime<Utc>, now: DateTime<Utc>) -> String {
    short_duration((now - created).num_seconds().max(0))
}

fn relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (at - now).num_seconds();
    if secs <= 0 {
        "passed".to_string()
    } else {
        format!("in {}", short_duration(secs))
    }
}

fn short_duration(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}
