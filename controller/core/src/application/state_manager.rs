// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Generator-State Manager Application Service
//!
//! The caller side of the lifecycle engine: generates credential material
//! and records the state the reconciler later cleans up.
//!
//! - A generator that returns no state needs no teardown, so no record is
//!   created for it.
//! - If the record cannot be persisted, the freshly generated state is
//!   cleaned up immediately; nothing external is left untracked.
//! - Records previously produced for the same owner slot are retired by
//!   giving them a garbage-collection deadline `gc_grace_period` from now.
//!   A retirement that keeps losing write races fails the whole call; the
//!   record created by that call is then retired by the caller's retry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::clock::Clock;
use crate::domain::context::OperationContext;
use crate::domain::generator::{GeneratorError, GeneratorResource, SecretData};
use crate::domain::generator_state::{GeneratorState, StateKey, LABEL_OWNER, LABEL_STATE_KEY};
use crate::domain::repository::{GeneratorStateRepository, RepositoryError};
use crate::domain::resources::ResourceAccessor;
use crate::infrastructure::generators::registry::GeneratorRegistry;

/// Conflicting writers are short-lived reconcile passes; a few re-reads suffice.
const SCHEDULE_GC_ATTEMPTS: u32 = 3;

/// `now + delay`, saturating at the latest representable instant.
fn offset(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, thiserror::Error)]
pub enum StateManagerError {
    #[error("no generator registered for kind '{0}'")]
    UnknownKind(String),

    #[error("generate failed for kind '{kind}': {source}")]
    Generate {
        kind: String,
        #[source]
        source: GeneratorError,
    },

    #[error("failed to persist generator state {key}: {source}")]
    Persist {
        key: StateKey,
        #[source]
        source: RepositoryError,
    },

    #[error(
        "failed to persist generator state {key}: {source}; rollback cleanup also failed: {rollback}"
    )]
    RollbackFailed {
        key: StateKey,
        source: RepositoryError,
        rollback: GeneratorError,
    },

    #[error("failed to retire superseded generator state {key}: {source}")]
    Retire {
        key: StateKey,
        #[source]
        source: RepositoryError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl StateManagerError {
    /// Store trouble is worth another attempt; a bad request is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UnknownKind(_) => false,
            Self::Generate { source, .. } => source.is_retryable(),
            Self::Persist { .. } | Self::RollbackFailed { .. } | Self::Retire { .. } => true,
            Self::Repository(_) => true,
        }
    }
}

/// One generation on behalf of `owner`.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub namespace: String,
    /// Object that consumes the credential (e.g. a secret-sync resource).
    pub owner: String,
    /// Slot within the owner; successive generations for a slot replace
    /// each other.
    pub state_key: String,
    pub resource: GeneratorResource,
    /// Optional lifetime for the new record.
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub data: SecretData,
    /// Persisted record; `None` for stateless generators.
    pub state: Option<GeneratorState>,
    /// Earlier records of the same slot that received a deadline.
    pub retired: usize,
}

pub struct GeneratorStateManager {
    repository: Arc<dyn GeneratorStateRepository>,
    registry: Arc<GeneratorRegistry>,
    resources: Arc<dyn ResourceAccessor>,
    clock: Arc<dyn Clock>,
    gc_grace_period: Duration,
}

impl GeneratorStateManager {
    pub fn new(
        repository: Arc<dyn GeneratorStateRepository>,
        registry: Arc<GeneratorRegistry>,
        resources: Arc<dyn ResourceAccessor>,
        clock: Arc<dyn Clock>,
        gc_grace_period: Duration,
    ) -> Self {
        Self {
            repository,
            registry,
            resources,
            clock,
            gc_grace_period,
        }
    }

    fn slot_selector(owner: &str, state_key: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_OWNER.to_string(), owner.to_string()),
            (LABEL_STATE_KEY.to_string(), state_key.to_string()),
        ])
    }

    pub async fn generate(
        &self,
        ctx: &OperationContext,
        request: &GenerateRequest,
    ) -> Result<GenerateOutcome, StateManagerError> {
        let kind = request.resource.kind.clone();
        let generator = self
            .registry
            .lookup(&kind)
            .ok_or_else(|| StateManagerError::UnknownKind(kind.clone()))?;

        let previous = self
            .repository
            .find_by_labels(
                &request.namespace,
                &Self::slot_selector(&request.owner, &request.state_key),
            )
            .await?;

        let generated = ctx
            .run(generator.generate(
                ctx,
                &request.resource,
                self.resources.as_ref(),
                &request.namespace,
            ))
            .await
            .map_err(|source| StateManagerError::Generate {
                kind: kind.clone(),
                source,
            })?;

        let created = match generated.state {
            Some(opaque) => {
                let now = self.clock.now();
                let suffix = Uuid::new_v4().simple().to_string();
                let name = format!("{}-{}", request.state_key, &suffix[..8]);
                let key = StateKey::new(&request.namespace, name);

                let mut record =
                    GeneratorState::new(key.clone(), &request.resource, Some(opaque.clone()), now)
                        .map_err(|source| StateManagerError::Generate {
                            kind: kind.clone(),
                            source,
                        })?
                        .with_label(LABEL_OWNER, &request.owner)
                        .with_label(LABEL_STATE_KEY, &request.state_key);
                if let Some(ttl) = request.ttl {
                    record = record.with_deadline(offset(now, ttl));
                }

                match self.repository.create(&record).await {
                    Ok(stored) => {
                        info!(
                            key = %key,
                            kind = %kind,
                            owner = %request.owner,
                            "Recorded generator state"
                        );
                        Some(stored)
                    }
                    Err(source) => {
                        warn!(
                            "Persisting generator state {} failed, rolling back: {}",
                            key, source
                        );
                        let rollback = ctx
                            .run(generator.cleanup(
                                ctx,
                                &request.resource,
                                Some(&opaque),
                                self.resources.as_ref(),
                                &request.namespace,
                            ))
                            .await;
                        return Err(match rollback {
                            Ok(()) => StateManagerError::Persist { key, source },
                            Err(rollback) => {
                                error!("Rollback cleanup for {} failed: {}", key, rollback);
                                StateManagerError::RollbackFailed { key, source, rollback }
                            }
                        });
                    }
                }
            }
            None => {
                debug!("Generator kind '{}' returned no state; nothing to track", kind);
                None
            }
        };

        let target = offset(self.clock.now(), self.gc_grace_period);
        let mut retired = 0;
        for old in previous {
            let key = old.key();
            match self.schedule_gc(old, target).await {
                Ok(true) => retired += 1,
                Ok(false) => {}
                Err(source) => {
                    warn!("Failed to retire previous generator state {}: {}", key, source);
                    return Err(StateManagerError::Retire { key, source });
                }
            }
        }

        Ok(GenerateOutcome {
            data: generated.data,
            state: created,
            retired,
        })
    }

    /// Give every record of `owner` an immediate deadline. Used when the
    /// owning object itself is deleted.
    pub async fn release_owner(
        &self,
        namespace: &str,
        owner: &str,
    ) -> Result<usize, StateManagerError> {
        let selector = BTreeMap::from([(LABEL_OWNER.to_string(), owner.to_string())]);
        let records = self.repository.find_by_labels(namespace, &selector).await?;

        let now = self.clock.now();
        let mut released = 0;
        for record in records {
            if self.schedule_gc(record, now).await? {
                released += 1;
            }
        }
        info!("Released {} generator states of owner {}/{}", released, namespace, owner);
        Ok(released)
    }

    /// Set the GC deadline to `target` unless an earlier one is already set.
    /// A write conflict re-reads the record and tries again.
    async fn schedule_gc(
        &self,
        record: GeneratorState,
        target: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let key = record.key();
        let mut record = record;
        let mut attempt = 1;
        loop {
            if record.is_being_deleted() {
                return Ok(false);
            }
            let deadline = record.spec.garbage_collection_deadline;
            if matches!(deadline, Some(existing) if existing <= target) {
                return Ok(false);
            }
            record.spec.garbage_collection_deadline = Some(target);
            match self.repository.update(&record).await {
                Ok(_) => {
                    debug!("Generator state {} garbage-collects at {}", key, target);
                    return Ok(true);
                }
                Err(RepositoryError::NotFound(_)) => return Ok(false),
                Err(e) if e.is_conflict() && attempt < SCHEDULE_GC_ATTEMPTS => {
                    debug!("Write conflict retiring {} (attempt {}), re-reading", key, attempt);
                    attempt += 1;
                    match self.repository.find_by_key(&key).await? {
                        Some(fresh) => record = fresh,
                        None => return Ok(false),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
