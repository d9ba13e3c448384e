// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype that is
//! injected into the PostgreSQL repository implementation. Only needed when
//! `spec.store.type` is `postgres`.

use sqlx::postgres::{PgPool, PgPoolOptions};
use anyhow::{Context, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generator_states (
    namespace                   TEXT        NOT NULL,
    name                        TEXT        NOT NULL,
    uid                         UUID        NOT NULL,
    resource_version            BIGINT      NOT NULL DEFAULT 1,
    creation_timestamp          TIMESTAMPTZ NOT NULL,
    deletion_timestamp          TIMESTAMPTZ,
    finalizers                  JSONB       NOT NULL DEFAULT '[]'::jsonb,
    labels                      JSONB       NOT NULL DEFAULT '{}'::jsonb,
    resource                    JSONB       NOT NULL,
    state                       JSONB,
    garbage_collection_deadline TIMESTAMPTZ,
    conditions                  JSONB       NOT NULL DEFAULT '[]'::jsonb,
    PRIMARY KEY (namespace, name)
);
CREATE INDEX IF NOT EXISTS generator_states_labels_idx ON generator_states USING GIN (labels);
"#;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }

    /// Create the `generator_states` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to apply generator_states schema")?;
        Ok(())
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}
