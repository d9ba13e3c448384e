// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # GeneratorState Repository (host store contract)
//!
//! Persistence contract for the `GeneratorState` aggregate, defined in the
//! domain layer and implemented in `crate::infrastructure::repositories`.
//!
//! | Implementation | Use |
//! |----------------|-----|
//! | `InMemoryGeneratorStateRepository` | standalone mode, tests |
//! | `PostgresGeneratorStateRepository` | durable deployments |
//!
//! ## Store semantics
//!
//! - Every write is an optimistic read-modify-write keyed on
//!   `metadata.resource_version`; a stale write fails with
//!   [`RepositoryError::Conflict`] and must be retried by the caller's
//!   scheduler, never dropped.
//! - `spec.resource` and `spec.state` are immutable after `create`.
//! - `delete` only *requests* deletion while finalizers remain: it stamps
//!   `deletion_timestamp`. The record disappears once its finalizer list is
//!   empty.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::generator_state::{GeneratorState, StateKey};

#[async_trait]
pub trait GeneratorStateRepository: Send + Sync {
    /// Persist a new record. Fails with `AlreadyExists` on a name clash.
    async fn create(&self, state: &GeneratorState) -> Result<GeneratorState, RepositoryError>;

    async fn find_by_key(&self, key: &StateKey) -> Result<Option<GeneratorState>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<GeneratorState>, RepositoryError>;

    /// Records in `namespace` carrying every label in `selector`.
    async fn find_by_labels(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<GeneratorState>, RepositoryError>;

    /// Write metadata (finalizers, labels) and the GC deadline. Returns the
    /// stored record with its new resource version.
    async fn update(&self, state: &GeneratorState) -> Result<GeneratorState, RepositoryError>;

    /// Write `status` only.
    async fn update_status(&self, state: &GeneratorState)
        -> Result<GeneratorState, RepositoryError>;

    /// Request deletion. Returns the record if it still exists afterwards
    /// (finalizers pending), `None` if it was removed outright.
    async fn delete(&self, key: &StateKey) -> Result<Option<GeneratorState>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    #[error("Write conflict on {key}: expected resource version {expected}")]
    Conflict { key: String, expected: u64 },

    #[error("Invalid write: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
