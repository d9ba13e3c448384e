// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Generator Registry - Kind Resolution for Generator Implementations
//
// Maps a generator kind discriminator (read from the self-describing
// resource envelope) to its implementation. Populated once during startup
// through `GeneratorRegistryBuilder`, then frozen: the built registry has
// no mutating methods, so lookups need no synchronization.

use crate::domain::generator::Generator;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("generator kind '{0}' is already registered")]
    DuplicateKind(String),

    #[error("generator kind cannot be empty")]
    EmptyKind,
}

/// Startup-phase builder. Each generator module registers itself exactly once.
#[derive(Default)]
pub struct GeneratorRegistryBuilder {
    generators: HashMap<String, Arc<dyn Generator>>,
}

impl GeneratorRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `generator` under `kind`. A second registration of the same
    /// kind is a startup bug and fails immediately.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        generator: Arc<dyn Generator>,
    ) -> Result<&mut Self, RegistryError> {
        let kind = kind.into();
        if kind.trim().is_empty() {
            return Err(RegistryError::EmptyKind);
        }
        if self.generators.contains_key(&kind) {
            return Err(RegistryError::DuplicateKind(kind));
        }
        info!("Registering generator kind '{}'", kind);
        self.generators.insert(kind, generator);
        Ok(self)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.generators.contains_key(kind)
    }

    pub fn build(self) -> GeneratorRegistry {
        info!("Generator registry sealed with {} kinds", self.generators.len());
        GeneratorRegistry {
            generators: self.generators,
        }
    }
}

/// Immutable kind → generator mapping shared by every reconcile worker.
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn Generator>>,
}

impl GeneratorRegistry {
    pub fn builder() -> GeneratorRegistryBuilder {
        GeneratorRegistryBuilder::new()
    }

    pub fn lookup(&self, kind: &str) -> Option<Arc<dyn Generator>> {
        self.generators.get(kind).cloned()
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

impl std::fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
