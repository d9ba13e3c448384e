// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Status Conditions
//!
//! A small ordered ledger of typed conditions attached to every
//! `GeneratorState`. At most one live entry exists per [`ConditionType`];
//! [`set_condition`] replaces in place and only moves
//! `last_transition_time` when the status actually flips.
//!
//! ## Vocabulary
//! | Type | Typical reasons |
//! |------|-----------------|
//! | `Ready` | `Created` |
//! | `DeletionScheduled` | `StillActive`, `GarbageCollectionSet` |
//! | `Terminating` | `DeadlineReached`, `IdleTimeoutReached` |
//! | `Failed` | `GeneratorNotFound`, `InvalidResource`, `PolicyError`, `CleanupError`, `Recovered` (status false) |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition types exposed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    DeletionScheduled,
    Terminating,
    /// Records written by older controllers used `PendingDeletion`.
    #[serde(alias = "PendingDeletion")]
    Failed,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::DeletionScheduled => "DeletionScheduled",
            Self::Terminating => "Terminating",
            Self::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

/// Machine-readable reason strings.
pub mod reason {
    pub const CREATED: &str = "Created";
    pub const STILL_ACTIVE: &str = "StillActive";
    pub const GARBAGE_COLLECTION_SET: &str = "GarbageCollectionSet";
    pub const DEADLINE_REACHED: &str = "DeadlineReached";
    pub const IDLE_TIMEOUT_REACHED: &str = "IdleTimeoutReached";
    pub const GENERATOR_NOT_FOUND: &str = "GeneratorNotFound";
    pub const INVALID_RESOURCE: &str = "InvalidResource";
    pub const POLICY_ERROR: &str = "PolicyError";
    pub const CLEANUP_ERROR: &str = "CleanupError";
    pub const RECOVERED: &str = "Recovered";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        condition_type: ConditionType,
        status: impl Into<ConditionStatus>,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            condition_type,
            status: status.into(),
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    fn same_content(&self, other: &Condition) -> bool {
        self.status == other.status && self.reason == other.reason && self.message == other.message
    }
}

/// Insert or replace the entry for `condition.condition_type`.
///
/// Returns `false` when nothing changed, so callers can skip the status
/// write entirely.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    let Some(index) = conditions
        .iter()
        .position(|c| c.condition_type == condition.condition_type)
    else {
        conditions.push(condition);
        return true;
    };

    // Collapse stray duplicates left behind by foreign writers.
    let mut seen = false;
    let before = conditions.len();
    conditions.retain(|c| {
        if c.condition_type != condition.condition_type {
            return true;
        }
        let keep = !seen;
        seen = true;
        keep
    });
    let deduplicated = conditions.len() != before;

    let existing = &mut conditions[index];
    if existing.same_content(&condition) {
        return deduplicated;
    }
    if existing.status == condition.status {
        condition.last_transition_time = existing.last_transition_time;
    }
    *existing = condition;
    true
}

pub fn get_condition(
    conditions: &[Condition],
    condition_type: ConditionType,
) -> Option<&Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}
