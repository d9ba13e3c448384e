// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # GeneratorState Aggregate
//!
//! One persisted record per outstanding generated credential. The record
//! keeps the exact generator request and opaque state produced at
//! generation time so that cleanup can reproduce what must be torn down.
//!
//! ## Lifecycle phases (derived, never stored)
//! | Finalizer | Deletion timestamp | Phase |
//! |-----------|--------------------|-------|
//! | absent | absent | `New` |
//! | present | absent | `Active` |
//! | present | set | `Terminating` |
//! | absent | set | `Gone` |

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::condition::{get_condition, set_condition, Condition, ConditionType};
use crate::domain::generator::{GeneratorError, GeneratorResource, OpaqueState};

/// Finalizer owned by the generator-state reconciler.
pub const GENERATOR_STATE_FINALIZER: &str = "generators.ephemera.io/generator-state";

/// Label naming the object that requested generation.
pub const LABEL_OWNER: &str = "generators.ephemera.io/owner";

/// Label grouping successive generations for the same owner slot.
pub const LABEL_STATE_KEY: &str = "generators.ephemera.io/state-key";

/// Namespaced identity of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub namespace: String,
    pub name: String,
}

impl StateKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for StateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(format!("expected <namespace>/<name>, got '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    New,
    Active,
    Terminating,
    Gone,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Active => "active",
            Self::Terminating => "terminating",
            Self::Gone => "gone",
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub uid: Uuid,
    /// Optimistic-concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub resource_version: u64,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorStateSpec {
    /// Serialized [`GeneratorResource`]; immutable after creation.
    pub resource: serde_json::Value,
    /// Generator-owned state; immutable after creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<OpaqueState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub garbage_collection_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorStateStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorState {
    pub metadata: ObjectMeta,
    pub spec: GeneratorStateSpec,
    #[serde(default)]
    pub status: GeneratorStateStatus,
}

impl GeneratorState {
    pub fn new(
        key: StateKey,
        resource: &GeneratorResource,
        state: Option<OpaqueState>,
        now: DateTime<Utc>,
    ) -> Result<Self, GeneratorError> {
        Ok(Self {
            metadata: ObjectMeta {
                name: key.name,
                namespace: key.namespace,
                uid: Uuid::new_v4(),
                resource_version: 0,
                creation_timestamp: now,
                deletion_timestamp: None,
                finalizers: Vec::new(),
                labels: BTreeMap::new(),
            },
            spec: GeneratorStateSpec {
                resource: resource.to_value()?,
                state,
                garbage_collection_deadline: None,
            },
            status: GeneratorStateStatus::default(),
        })
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.spec.garbage_collection_deadline = Some(deadline);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> StateKey {
        StateKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn phase(&self) -> LifecyclePhase {
        match (self.has_finalizer(), self.metadata.deletion_timestamp.is_some()) {
            (false, false) => LifecyclePhase::New,
            (true, false) => LifecyclePhase::Active,
            (true, true) => LifecyclePhase::Terminating,
            (false, true) => LifecyclePhase::Gone,
        }
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .iter()
            .any(|f| f == GENERATOR_STATE_FINALIZER)
    }

    /// Returns `true` if the finalizer was not already present.
    pub fn add_finalizer(&mut self) -> bool {
        if self.has_finalizer() {
            return false;
        }
        self.metadata
            .finalizers
            .push(GENERATOR_STATE_FINALIZER.to_string());
        true
    }

    /// Returns `true` if the finalizer was present.
    pub fn remove_finalizer(&mut self) -> bool {
        let before = self.metadata.finalizers.len();
        self.metadata
            .finalizers
            .retain(|f| f != GENERATOR_STATE_FINALIZER);
        before != self.metadata.finalizers.len()
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    pub fn decode_resource(&self) -> Result<GeneratorResource, GeneratorError> {
        GeneratorResource::from_value(&self.spec.resource)
    }

    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        get_condition(&self.status.conditions, condition_type)
    }

    pub fn set_condition(&mut self, condition: Condition) -> bool {
        set_condition(&mut self.status.conditions, condition)
    }
}
