// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres GeneratorState
//!
//! Durable implementation of `GeneratorStateRepository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Stores generator-state records in the `generator_states`
//!   table. Metadata writes run in a transaction holding a row lock so the
//!   version check, the immutability check and finalizer-driven removal
//!   happen atomically.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::{ensure_immutable_spec, ensure_version};
use crate::domain::condition::Condition;
use crate::domain::events::StoreEvent;
use crate::domain::generator_state::{
    GeneratorState, GeneratorStateSpec, GeneratorStateStatus, ObjectMeta, StateKey,
};
use crate::domain::repository::{GeneratorStateRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;

const COLUMNS: &str = r#"
    namespace, name, uid, resource_version, creation_timestamp, deletion_timestamp,
    finalizers, labels, resource, state, garbage_collection_deadline, conditions
"#;

pub struct PostgresGeneratorStateRepository {
    pool: PgPool,
    event_bus: Option<Arc<EventBus>>,
}

impl PostgresGeneratorStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            event_bus: None,
        }
    }

    /// Publish a `StoreEvent` for every committed mutation made through
    /// this process. Writes from other processes surface on resync.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn notify_changed(&self, state: &GeneratorState) {
        if let Some(bus) = &self.event_bus {
            bus.publish_store_event(StoreEvent::Changed {
                key: state.key(),
                resource_version: state.metadata.resource_version,
            });
        }
    }

    fn notify_removed(&self, key: &StateKey) {
        if let Some(bus) = &self.event_bus {
            bus.publish_store_event(StoreEvent::Removed { key: key.clone() });
        }
    }

    async fn current_version(&self, key: &StateKey) -> Result<Option<i64>, RepositoryError> {
        let row = sqlx::query(
            "SELECT resource_version FROM generator_states WHERE namespace = $1 AND name = $2",
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.map(|r| r.try_get::<i64, _>("resource_version"))
            .transpose()
            .map_err(|e| RepositoryError::Database(e.to_string()))
    }
}

#[async_trait]
impl GeneratorStateRepository for PostgresGeneratorStateRepository {
    async fn create(&self, state: &GeneratorState) -> Result<GeneratorState, RepositoryError> {
        let finalizers_json = serde_json::to_value(&state.metadata.finalizers)?;
        let labels_json = serde_json::to_value(&state.metadata.labels)?;
        let conditions_json = serde_json::to_value(&state.status.conditions)?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO generator_states (
                namespace, name, uid, resource_version, creation_timestamp, deletion_timestamp,
                finalizers, labels, resource, state, garbage_collection_deadline, conditions
            )
            VALUES ($1, $2, $3, 1, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (namespace, name) DO NOTHING
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&state.metadata.namespace)
        .bind(&state.metadata.name)
        .bind(state.metadata.uid)
        .bind(state.metadata.creation_timestamp)
        .bind(state.metadata.deletion_timestamp)
        .bind(finalizers_json)
        .bind(labels_json)
        .bind(&state.spec.resource)
        .bind(&state.spec.state)
        .bind(state.spec.garbage_collection_deadline)
        .bind(conditions_json)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            RepositoryError::Database(format!("Failed to create generator state: {}", e))
        })?;

        let stored = match row {
            Some(row) => parse_generator_state_row(row)?,
            None => return Err(RepositoryError::AlreadyExists(state.key().to_string())),
        };
        self.notify_changed(&stored);
        Ok(stored)
    }

    async fn find_by_key(&self, key: &StateKey) -> Result<Option<GeneratorState>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM generator_states WHERE namespace = $1 AND name = $2"
        ))
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.map(parse_generator_state_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<GeneratorState>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM generator_states ORDER BY namespace, name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.into_iter().map(parse_generator_state_row).collect()
    }

    async fn find_by_labels(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<GeneratorState>, RepositoryError> {
        let selector_json = serde_json::to_value(selector)?;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM generator_states
            WHERE namespace = $1 AND labels @> $2
            ORDER BY creation_timestamp ASC
            "#
        ))
        .bind(namespace)
        .bind(selector_json)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.into_iter().map(parse_generator_state_row).collect()
    }

    async fn update(&self, state: &GeneratorState) -> Result<GeneratorState, RepositoryError> {
        let key = state.key();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM generator_states WHERE namespace = $1 AND name = $2 FOR UPDATE"
        ))
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(&mut *tx)
        .await?;
        let stored = match row {
            Some(row) => parse_generator_state_row(row)?,
            None => return Err(RepositoryError::NotFound(key.to_string())),
        };
        ensure_version(&stored, state)?;
        ensure_immutable_spec(&stored, state)?;

        let finalizing = stored.is_being_deleted() && state.metadata.finalizers.is_empty();
        let written = if finalizing {
            sqlx::query("DELETE FROM generator_states WHERE namespace = $1 AND name = $2")
                .bind(&key.namespace)
                .bind(&key.name)
                .execute(&mut *tx)
                .await?;
            let mut removed = stored;
            removed.metadata.finalizers.clear();
            removed.metadata.labels = state.metadata.labels.clone();
            removed.spec.garbage_collection_deadline = state.spec.garbage_collection_deadline;
            removed.metadata.resource_version += 1;
            removed
        } else {
            let row = sqlx::query(&format!(
                r#"
                UPDATE generator_states SET
                    finalizers = $3,
                    labels = $4,
                    garbage_collection_deadline = $5,
                    resource_version = resource_version + 1
                WHERE namespace = $1 AND name = $2
                RETURNING {COLUMNS}
                "#
            ))
            .bind(&key.namespace)
            .bind(&key.name)
            .bind(serde_json::to_value(&state.metadata.finalizers)?)
            .bind(serde_json::to_value(&state.metadata.labels)?)
            .bind(state.spec.garbage_collection_deadline)
            .fetch_one(&mut *tx)
            .await?;
            parse_generator_state_row(row)?
        };

        tx.commit().await?;
        if finalizing {
            self.notify_removed(&key);
        } else {
            self.notify_changed(&written);
        }
        Ok(written)
    }

    async fn update_status(
        &self,
        state: &GeneratorState,
    ) -> Result<GeneratorState, RepositoryError> {
        let key = state.key();
        let row = sqlx::query(&format!(
            r#"
            UPDATE generator_states SET
                conditions = $4,
                resource_version = resource_version + 1
            WHERE namespace = $1 AND name = $2 AND resource_version = $3
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(state.metadata.resource_version as i64)
        .bind(serde_json::to_value(&state.status.conditions)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if let Some(row) = row {
            let written = parse_generator_state_row(row)?;
            self.notify_changed(&written);
            return Ok(written);
        }
        match self.current_version(&key).await? {
            Some(_) => Err(RepositoryError::Conflict {
                key: key.to_string(),
                expected: state.metadata.resource_version,
            }),
            None => Err(RepositoryError::NotFound(key.to_string())),
        }
    }

    async fn delete(&self, key: &StateKey) -> Result<Option<GeneratorState>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM generator_states WHERE namespace = $1 AND name = $2 FOR UPDATE"
        ))
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(&mut *tx)
        .await?;
        let stored = match row {
            Some(row) => parse_generator_state_row(row)?,
            None => return Err(RepositoryError::NotFound(key.to_string())),
        };

        let outcome = if stored.metadata.finalizers.is_empty() {
            sqlx::query("DELETE FROM generator_states WHERE namespace = $1 AND name = $2")
                .bind(&key.namespace)
                .bind(&key.name)
                .execute(&mut *tx)
                .await?;
            None
        } else if stored.is_being_deleted() {
            Some(stored)
        } else {
            let row = sqlx::query(&format!(
                r#"
                UPDATE generator_states SET
                    deletion_timestamp = NOW(),
                    resource_version = resource_version + 1
                WHERE namespace = $1 AND name = $2
                RETURNING {COLUMNS}
                "#
            ))
            .bind(&key.namespace)
            .bind(&key.name)
            .fetch_one(&mut *tx)
            .await?;
            Some(parse_generator_state_row(row)?)
        };

        tx.commit().await?;
        match &outcome {
            Some(state) => self.notify_changed(state),
            None => self.notify_removed(key),
        }
        Ok(outcome)
    }
}

fn parse_generator_state_row(row: PgRow) -> Result<GeneratorState, RepositoryError> {
    let get_err = |e: sqlx::Error| RepositoryError::Database(e.to_string());

    let resource_version: i64 = row.try_get("resource_version").map_err(get_err)?;
    let finalizers: Vec<String> =
        serde_json::from_value(row.try_get("finalizers").map_err(get_err)?)?;
    let labels: BTreeMap<String, String> =
        serde_json::from_value(row.try_get("labels").map_err(get_err)?)?;
    let conditions: Vec<Condition> =
        serde_json::from_value(row.try_get("conditions").map_err(get_err)?)?;
    let creation_timestamp: DateTime<Utc> = row.try_get("creation_timestamp").map_err(get_err)?;
    let uid: Uuid = row.try_get("uid").map_err(get_err)?;

    Ok(GeneratorState {
        metadata: ObjectMeta {
            name: row.try_get("name").map_err(get_err)?,
            namespace: row.try_get("namespace").map_err(get_err)?,
            uid,
            resource_version: resource_version as u64,
            creation_timestamp,
            deletion_timestamp: row.try_get("deletion_timestamp").map_err(get_err)?,
            finalizers,
            labels,
        },
        spec: GeneratorStateSpec {
            resource: row.try_get("resource").map_err(get_err)?,
            state: row.try_get("state").map_err(get_err)?,
            garbage_collection_deadline: row
                .try_get("garbage_collection_deadline")
                .map_err(get_err)?,
        },
        status: GeneratorStateStatus { conditions },
    })
}
