// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Namespace-scoped access to auxiliary cluster resources.
//!
//! Generators use this to resolve credentials they need to reach their
//! backend (an API key secret, an endpoint config map). Lookups are reads
//! only; a missing object is `Ok(None)`, not an error.

use std::collections::BTreeMap;

use async_trait::async_trait;

#[async_trait]
pub trait ResourceAccessor: Send + Sync {
    async fn secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, ResourceError>;

    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ResourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("access to {kind} {namespace}/{name} denied")]
    Forbidden {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("resource backend error: {0}")]
    Backend(String),
}
