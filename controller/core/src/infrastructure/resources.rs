// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory [`ResourceAccessor`] for standalone mode and tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::resources::{ResourceAccessor, ResourceError};

type ObjectKey = (String, String);

#[derive(Default)]
pub struct InMemoryResourceAccessor {
    secrets: RwLock<HashMap<ObjectKey, BTreeMap<String, Vec<u8>>>>,
    config_maps: RwLock<HashMap<ObjectKey, BTreeMap<String, String>>>,
}

impl InMemoryResourceAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_secret(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        data: BTreeMap<String, Vec<u8>>,
    ) {
        self.secrets
            .write()
            .insert((namespace.into(), name.into()), data);
    }

    pub fn insert_config_map(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        data: BTreeMap<String, String>,
    ) {
        self.config_maps
            .write()
            .insert((namespace.into(), name.into()), data);
    }
}

#[async_trait]
impl ResourceAccessor for InMemoryResourceAccessor {
    async fn secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ResourceError> {
        Ok(self
            .secrets
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ResourceError> {
        Ok(self
            .config_maps
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}
