// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Controller Configuration Types
//
// Defines the configuration schema for the ephemera controller process:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Work-queue and retry settings
// - Host store selection (in-memory or PostgreSQL)
// - Generator enablement and state manager grace period
// - Logging and metrics settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_API_VERSION: &str = "ephemera.io/v1";
pub const CONFIG_KIND: &str = "ControllerConfig";

/// Top-level Kubernetes-style controller configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// API version (must be "ephemera.io/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ControllerConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ControllerConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Controller instance name, used in log lines
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfigSpec {
    #[serde(default)]
    pub controller: ControllerSettings,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub generators: GeneratorsConfig,

    #[serde(default)]
    pub state_manager: StateManagerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Number of concurrent reconcile workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Full relist interval; also recovers records whose requeue was lost
    /// across a restart
    #[serde(default = "default_resync_interval", with = "humantime_serde")]
    pub resync_interval: Duration,

    /// Upper bound for a single generator call within one pass
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resync_interval: default_resync_interval(),
            operation_timeout: default_operation_timeout(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Per-key exponential retry backoff: `base * 2^failures`, capped at `max`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base", with = "humantime_serde")]
    pub base: Duration,

    #[serde(default = "default_backoff_max", with = "humantime_serde")]
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: default_backoff_base(),
            max: default_backoff_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local store; records are lost on restart
    Memory,

    /// PostgreSQL-backed store
    Postgres {
        /// Connection string (supports "env:VAR_NAME")
        connection_string: String,

        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorsConfig {
    /// Built-in generator kinds that should not be registered
    #[serde(default)]
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateManagerConfig {
    /// How long superseded generator states linger before GC
    #[serde(default = "default_gc_grace_period", with = "humantime_serde")]
    pub gc_grace_period: Duration,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            gc_grace_period: default_gc_grace_period(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus exposition
    #[serde(default)]
    pub enabled: bool,

    /// Metrics endpoint port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

// Default value functions
fn default_workers() -> usize {
    4
}

fn default_resync_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_base() -> Duration {
    Duration::from_millis(5)
}

fn default_backoff_max() -> Duration {
    Duration::from_secs(1000)
}

fn default_max_connections() -> u32 {
    5
}

fn default_gc_grace_period() -> Duration {
    Duration::from_secs(120)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "ephemera-controller".to_string());

        Self {
            api_version: CONFIG_API_VERSION.to_string(),
            kind: CONFIG_KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                labels: None,
            },
            spec: ControllerConfigSpec::default(),
        }
    }
}

/// Resolve a setting that may use the "env:VAR_NAME" indirection
pub fn resolve_env_reference(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => std::env::var(var_name)
            .map_err(|_| anyhow::anyhow!("Environment variable not set: {}", var_name)),
        None => Ok(value.to_string()),
    }
}

impl ControllerConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. EPHEMERA_CONFIG_PATH environment variable
    /// 2. ./ephemera-config.yaml (working directory)
    /// 3. ~/.ephemera/config.yaml (user home)
    /// 4. /etc/ephemera/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("EPHEMERA_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./ephemera-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".ephemera").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/ephemera/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("EPHEMERA_WORKERS") {
            match val.parse::<usize>() {
                Ok(workers) => {
                    tracing::info!("Environment override: EPHEMERA_WORKERS={}", workers);
                    self.spec.controller.workers = workers;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for EPHEMERA_WORKERS: '{}'. Expected a positive integer. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(url) = std::env::var("EPHEMERA_DATABASE_URL") {
            tracing::info!("Environment override: EPHEMERA_DATABASE_URL (postgres store)");
            let max_connections = match &self.spec.store {
                StoreConfig::Postgres { max_connections, .. } => *max_connections,
                StoreConfig::Memory => default_max_connections(),
            };
            self.spec.store = StoreConfig::Postgres {
                connection_string: url,
                max_connections,
            };
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != CONFIG_API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                CONFIG_API_VERSION
            );
        }

        if self.kind != CONFIG_KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, CONFIG_KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let controller = &self.spec.controller;
        if controller.workers == 0 {
            anyhow::bail!("spec.controller.workers must be at least 1");
        }

        if controller.backoff.base > controller.backoff.max {
            anyhow::bail!(
                "spec.controller.backoff.base ({:?}) exceeds backoff.max ({:?})",
                controller.backoff.base,
                controller.backoff.max
            );
        }

        if controller.resync_interval.is_zero() {
            anyhow::bail!("spec.controller.resync_interval must be non-zero");
        }

        if let StoreConfig::Postgres {
            connection_string,
            max_connections,
        } = &self.spec.store
        {
            if connection_string.is_empty() {
                anyhow::bail!("spec.store.connection_string cannot be empty for a postgres store");
            }
            if *max_connections == 0 {
                anyhow::bail!("spec.store.max_connections must be at least 1");
            }
        }

        match self.spec.observability.logging.format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("Unsupported log format '{}'. Use 'json' or 'text'", other),
        }

        Ok(())
    }

    /// Reject disabled generator kinds that are not known to this binary
    pub fn validate_generator_kinds(&self, known: &[&str]) -> anyhow::Result<()> {
        for kind in &self.spec.generators.disabled {
            if !known.contains(&kind.as_str()) {
                anyhow::bail!(
                    "spec.generators.disabled references unknown generator kind '{}' (known: {})",
                    kind,
                    known.join(", ")
                );
            }
        }
        Ok(())
    }
}
