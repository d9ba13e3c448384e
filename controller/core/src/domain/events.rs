// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::generator_state::StateKey;

/// Change notifications emitted by a store that supports watching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreEvent {
    Changed {
        key: StateKey,
        resource_version: u64,
    },
    Removed {
        key: StateKey,
    },
}

impl StoreEvent {
    pub fn key(&self) -> &StateKey {
        match self {
            StoreEvent::Changed { key, .. } => key,
            StoreEvent::Removed { key } => key,
        }
    }
}

/// Lifecycle decisions taken by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GeneratorStateEvent {
    FinalizerAdded {
        key: StateKey,
        added_at: DateTime<Utc>,
    },
    Ready {
        key: StateKey,
        ready_at: DateTime<Utc>,
    },
    DeletionScheduled {
        key: StateKey,
        reason: String,
        requeue_after_ms: u64,
        scheduled_at: DateTime<Utc>,
    },
    DeletionRequested {
        key: StateKey,
        reason: String,
        requested_at: DateTime<Utc>,
    },
    CleanupSucceeded {
        key: StateKey,
        kind: String,
        cleaned_at: DateTime<Utc>,
    },
    CleanupFailed {
        key: StateKey,
        kind: String,
        error: String,
        failed_at: DateTime<Utc>,
    },
    ResolutionFailed {
        key: StateKey,
        reason: String,
        error: String,
        failed_at: DateTime<Utc>,
    },
}

impl GeneratorStateEvent {
    pub fn key(&self) -> &StateKey {
        match self {
            GeneratorStateEvent::FinalizerAdded { key, .. } => key,
            GeneratorStateEvent::Ready { key, .. } => key,
            GeneratorStateEvent::DeletionScheduled { key, .. } => key,
            GeneratorStateEvent::DeletionRequested { key, .. } => key,
            GeneratorStateEvent::CleanupSucceeded { key, .. } => key,
            GeneratorStateEvent::CleanupFailed { key, .. } => key,
            GeneratorStateEvent::ResolutionFailed { key, .. } => key,
        }
    }
}
