// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! `uuid` generator: a random v4 UUID under a configurable key.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::context::OperationContext;
use crate::domain::generator::{
    CleanupPolicy, Generated, Generator, GeneratorError, GeneratorResource, OpaqueState,
};
use crate::domain::resources::ResourceAccessor;
use crate::infrastructure::generators::registry::{GeneratorRegistryBuilder, RegistryError};

pub const KIND: &str = "uuid";

#[derive(Debug, Deserialize)]
struct UuidSpec {
    #[serde(default = "default_key")]
    key: String,
}

fn default_key() -> String {
    "uuid".to_string()
}

pub struct UuidGenerator;

pub fn register(builder: &mut GeneratorRegistryBuilder) -> Result<(), RegistryError> {
    builder.register(KIND, Arc::new(UuidGenerator))?;
    Ok(())
}

#[async_trait]
impl Generator for UuidGenerator {
    async fn generate(
        &self,
        _ctx: &OperationContext,
        resource: &GeneratorResource,
        _resources: &dyn ResourceAccessor,
        _namespace: &str,
    ) -> Result<Generated, GeneratorError> {
        let spec: UuidSpec = resource.parse_spec()?;
        if spec.key.is_empty() {
            return Err(GeneratorError::ConfigInvalid("uuid spec.key cannot be empty".to_string()));
        }
        let mut data = BTreeMap::new();
        data.insert(spec.key, ::uuid::Uuid::new_v4().to_string().into_bytes());
        Ok(Generated::stateless(data))
    }

    async fn cleanup(
        &self,
        _ctx: &OperationContext,
        _resource: &GeneratorResource,
        _state: Option<&OpaqueState>,
        _resources: &dyn ResourceAccessor,
        _namespace: &str,
    ) -> Result<(), GeneratorError> {
        Ok(())
    }

    async fn cleanup_policy(
        &self,
        _resource: &GeneratorResource,
    ) -> Result<Option<CleanupPolicy>, GeneratorError> {
        Ok(None)
    }

    async fn last_activity_time(
        &self,
        _ctx: &OperationContext,
        _resource: &GeneratorResource,
        _state: Option<&OpaqueState>,
        _resources: &dyn ResourceAccessor,
        _namespace: &str,
    ) -> Result<Option<DateTime<Utc>>, GeneratorError> {
        Ok(None)
    }
}
