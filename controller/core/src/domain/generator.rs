// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Generator Contract
//!
//! A generator produces ephemeral credential material on demand and may
//! leave side effects in an external system (an issued token, a created
//! service account) that must be torn down later. The engine only ever
//! talks to generators through the four operations of [`Generator`]; it
//! never inspects concrete types.
//!
//! Generator configuration travels as a self-describing
//! [`GeneratorResource`] envelope whose `kind` selects the implementation in
//! the registry. Generator state is an opaque JSON document that only the
//! owning generator interprets.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::context::OperationContext;
use crate::domain::resources::ResourceAccessor;

/// Uninterpreted generator-owned state, persisted verbatim.
pub type OpaqueState = serde_json::Value;

/// Secret material keyed by secret data key.
pub type SecretData = BTreeMap<String, Vec<u8>>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce credential material plus the state needed to tear it down.
    async fn generate(
        &self,
        ctx: &OperationContext,
        resource: &GeneratorResource,
        resources: &dyn ResourceAccessor,
        namespace: &str,
    ) -> Result<Generated, GeneratorError>;

    /// Tear down whatever `generate` created. Must be idempotent: a repeat
    /// call after a prior success succeeds without repeating side effects.
    async fn cleanup(
        &self,
        ctx: &OperationContext,
        resource: &GeneratorResource,
        state: Option<&OpaqueState>,
        resources: &dyn ResourceAccessor,
        namespace: &str,
    ) -> Result<(), GeneratorError>;

    /// `None` means no generator-driven GC.
    async fn cleanup_policy(
        &self,
        resource: &GeneratorResource,
    ) -> Result<Option<CleanupPolicy>, GeneratorError>;

    /// `None` means no activity signal is available yet. That is "unknown",
    /// never "idle".
    async fn last_activity_time(
        &self,
        ctx: &OperationContext,
        resource: &GeneratorResource,
        state: Option<&OpaqueState>,
        resources: &dyn ResourceAccessor,
        namespace: &str,
    ) -> Result<Option<DateTime<Utc>>, GeneratorError>;
}

/// Result of a successful `generate` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generated {
    pub data: SecretData,
    pub state: Option<OpaqueState>,
}

impl Generated {
    pub fn stateless(data: SecretData) -> Self {
        Self { data, state: None }
    }

    pub fn with_state(data: SecretData, state: OpaqueState) -> Self {
        Self {
            data,
            state: Some(state),
        }
    }
}

/// Generator-supplied garbage-collection directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CleanupPolicy {
    /// Delete at `GarbageCollectionDeadline`.
    Deadline,
    /// Delete once no activity has been observed for `idle_timeout`.
    Idle {
        #[serde(rename = "idleTimeout", with = "humantime_serde")]
        idle_timeout: Duration,
    },
}

impl CleanupPolicy {
    pub fn idle(idle_timeout: Duration) -> Self {
        Self::Idle { idle_timeout }
    }
}

/// Self-describing generator request stored in `GeneratorState.resource`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorResource {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ResourceMetadata,
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

fn default_api_version() -> String {
    GENERATOR_API_VERSION.to_string()
}

pub const GENERATOR_API_VERSION: &str = "generators.ephemera.io/v1alpha1";

impl GeneratorResource {
    pub fn new(kind: impl Into<String>, spec: serde_json::Value) -> Self {
        Self {
            api_version: default_api_version(),
            kind: kind.into(),
            metadata: ResourceMetadata::default(),
            spec,
        }
    }

    /// Decode a stored envelope. Fails when the payload is malformed or
    /// carries no kind discriminator.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, GeneratorError> {
        let resource: Self = serde_json::from_value(value.clone())
            .map_err(|e| {
                GeneratorError::ConfigInvalid(format!("malformed generator resource: {}", e))
            })?;
        if resource.kind.trim().is_empty() {
            return Err(GeneratorError::ConfigInvalid(
                "generator resource has an empty kind".to_string(),
            ));
        }
        Ok(resource)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, GeneratorError> {
        serde_json::to_value(self)
            .map_err(|e| {
                GeneratorError::Internal(format!("failed to encode generator resource: {}", e))
            })
    }

    /// Decode `spec` into a generator-specific configuration type.
    pub fn parse_spec<T: DeserializeOwned>(&self) -> Result<T, GeneratorError> {
        let spec = if self.spec.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            self.spec.clone()
        };
        serde_json::from_value(spec).map_err(|e| {
            GeneratorError::ConfigInvalid(format!("invalid {} spec: {}", self.kind, e))
        })
    }
}

/// Errors shared by all four contract operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeneratorError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("referenced resource not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error("internal generator error: {0}")]
    Internal(String),
}

impl GeneratorError {
    /// Whether retrying the same call later may succeed without operator
    /// action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_)
                | Self::Cancelled
                | Self::DeadlineExceeded
                | Self::Internal(_)
        )
    }
}
