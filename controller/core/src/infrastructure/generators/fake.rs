// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! `fake` generator: returns the static `data` map from its spec. Useful for
//! wiring tests and demos; it has no external side effects.
//!
//! When the resource `spec` carries a `state` value it is returned as opaque state, so
//! the record goes through the full lifecycle; `cleanupPolicy` is echoed
//! back verbatim.

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

pub const KIND: &str = "fake";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FakeSpec {
    #[serde(default)]
    data: BTreeMap<String, String>,
    #[serde(default)]
    state: Option<OpaqueState>,
    #[serde(default)]
    cleanup_policy: Option<CleanupPolicy>,
}

pub struct FakeGenerator;

pub fn register(builder: &mut GeneratorRegistryBuilder) -> Result<(), RegistryError> {
    builder.register(KIND, Arc::new(FakeGenerator))?;
    Ok(())
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(
        &self,
        _ctx: &OperationContext,
        resource: &GeneratorResource,
        _resources: &dyn ResourceAccessor,
        _namespace: &str,
    ) -> Result<Generated, GeneratorError> {
        let spec: FakeSpec = resource.parse_spec()?;
        let data = spec
            .data
            .into_iter()
            .map(|(k, v)| (k, v.into_bytes()))
            .collect();
        Ok(match spec.state {
            Some(state) => Generated::with_state(data, state),
            None => Generated::stateless(data),
        })
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
        resource: &GeneratorResource,
    ) -> Result<Option<CleanupPolicy>, GeneratorError> {
        let spec: FakeSpec = resource.parse_spec()?;
        Ok(spec.cleanup_policy)
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
