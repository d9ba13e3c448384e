// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process wiring shared by every command that touches generator state:
//! configuration loading, the generator registry and the host store.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use ephemera_core::domain::controller_config::{
    resolve_env_reference, ControllerConfig, LoggingConfig, StoreConfig,
};
use ephemera_core::domain::repository::GeneratorStateRepository;
use ephemera_core::infrastructure::db::Database;
use ephemera_core::infrastructure::event_bus::EventBus;
use ephemera_core::infrastructure::generators::registry::GeneratorRegistry;
use ephemera_core::infrastructure::generators::{register_builtin, BUILTIN_KINDS};
use ephemera_core::infrastructure::repositories::{
    InMemoryGeneratorStateRepository, PostgresGeneratorStateRepository,
};

/// Load, override and validate the controller configuration.
pub fn load_config(config_path: Option<PathBuf>) -> Result<ControllerConfig> {
    let config =
        ControllerConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    config
        .validate_generator_kinds(BUILTIN_KINDS)
        .context("Configuration validation failed")?;
    Ok(config)
}

/// Logging settings read before the subscriber exists; a broken config
/// file is reported later by the command that loads it for real.
pub fn logging_settings(config_path: Option<PathBuf>) -> LoggingConfig {
    ControllerConfig::load_or_default(config_path)
        .map(|config| config.spec.observability.logging)
        .unwrap_or_default()
}

pub fn build_registry(config: &ControllerConfig) -> Result<Arc<GeneratorRegistry>> {
    let mut builder = GeneratorRegistry::builder();
    register_builtin(&mut builder, &config.spec.generators.disabled)
        .context("Failed to register built-in generators")?;
    let registry = builder.build();
    info!("Generator registry ready: [{}]", registry.kinds().join(", "));
    Ok(Arc::new(registry))
}

/// Everything a command needs to read or drive generator state.
pub struct Runtime {
    pub config: ControllerConfig,
    pub registry: Arc<GeneratorRegistry>,
    pub repository: Arc<dyn GeneratorStateRepository>,
    pub event_bus: Arc<EventBus>,
    /// False for the process-local in-memory store.
    pub durable: bool,
}

impl Runtime {
    pub async fn build(config: ControllerConfig) -> Result<Self> {
        let registry = build_registry(&config)?;
        let event_bus = Arc::new(EventBus::with_default_capacity());

        let (repository, durable): (Arc<dyn GeneratorStateRepository>, bool) =
            match &config.spec.store {
                StoreConfig::Memory => {
                    info!("Using in-memory generator state store");
                    let store =
                        InMemoryGeneratorStateRepository::new().with_event_bus(event_bus.clone());
                    (Arc::new(store), false)
                }
                StoreConfig::Postgres {
                    connection_string,
                    max_connections,
                } => {
                    let url = resolve_env_reference(connection_string)
                        .context("Failed to resolve spec.store.connection_string")?;
                    let db = Database::new(&url, *max_connections).await?;
                    db.ensure_schema().await?;
                    info!("Using PostgreSQL generator state store");
                    let store = PostgresGeneratorStateRepository::new(db.get_pool().clone())
                        .with_event_bus(event_bus.clone());
                    (Arc::new(store), true)
                }
            };

        Ok(Self {
            config,
            registry,
            repository,
            event_bus,
            durable,
        })
    }

    /// Fail when the command would only ever see an empty process-local store.
    pub fn require_durable(&self, command: &str) -> Result<()> {
        if !self.durable {
            anyhow::bail!(
                "'{}' needs a shared store; the in-memory store only lives inside 'ephemera run'. \
                 Configure spec.store.type=postgres or set EPHEMERA_DATABASE_URL",
                command
            );
        }
        Ok(())
    }
}
