// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Generator-State Reconciler
//!
//! Level-triggered state machine owning one `GeneratorState` record per
//! outstanding generated credential. Each call to
//! [`GeneratorStateReconciler::reconcile`] is a single pass: it reads the
//! record, takes at most one lifecycle step and reports back to the caller's
//! scheduler with a [`ReconcileAction`] or a [`ReconcileError`]. It never
//! spawns timers and never retries inside a pass.
//!
//! ```text
//!   New ──add finalizer──▶ Active ──deadline / idle expiry──▶ Terminating
//!                            │          (request deletion)        │
//!                            │                                    │ Cleanup ok
//!                            └────── user delete ────────────────▶│──remove finalizer──▶ Gone
//! ```
//!
//! Every branch is idempotent: the same record may be reconciled again right
//! after a requeue, a watch event or a restart. The finalizer is the only
//! authority for "cleanup has not run yet"; it is removed only after
//! `Cleanup` returned success in the same pass.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::application::idle_probe;
use crate::domain::clock::Clock;
use crate::domain::condition::{reason, Condition, ConditionType};
use crate::domain::context::OperationContext;
use crate::domain::events::GeneratorStateEvent;
use crate::domain::generator::{CleanupPolicy, Generator, GeneratorError, GeneratorResource};
use crate::domain::generator_state::{GeneratorState, LifecyclePhase, StateKey};
use crate::domain::repository::{GeneratorStateRepository, RepositoryError};
use crate::domain::resources::ResourceAccessor;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::generators::registry::GeneratorRegistry;

const READY_MESSAGE: &str = "generator state is active and has no garbage collection deadline";

/// What the scheduler should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Nothing further until the record changes again.
    Done,
    /// Re-run no earlier than the given delay.
    RequeueAfter(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The stored resource cannot be decoded or its kind is not registered.
    /// Needs operator action.
    #[error("cannot resolve generator for {key}: {message}")]
    Resolution {
        key: StateKey,
        reason: &'static str,
        message: String,
    },

    #[error("cleanup policy evaluation failed for {key}: {source}")]
    Policy {
        key: StateKey,
        #[source]
        source: GeneratorError,
    },

    #[error("cleanup of {key} (kind '{kind}') failed: {source}")]
    Cleanup {
        key: StateKey,
        kind: String,
        #[source]
        source: GeneratorError,
    },

    #[error("store operation '{operation}' failed for {key}: {source}")]
    Store {
        key: StateKey,
        operation: &'static str,
        #[source]
        source: RepositoryError,
    },

    #[error("reconciliation of {key} cancelled")]
    Cancelled { key: StateKey },
}

impl ReconcileError {
    /// Resolution failures are terminal; everything else goes back to the
    /// scheduler's backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Resolution { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store { source, .. } if source.is_conflict())
    }

    pub fn key(&self) -> &StateKey {
        match self {
            Self::Resolution { key, .. }
            | Self::Policy { key, .. }
            | Self::Cleanup { key, .. }
            | Self::Store { key, .. }
            | Self::Cancelled { key } => key,
        }
    }
}

struct ResolutionFailure {
    reason: &'static str,
    message: String,
}

fn store_error(key: &StateKey, operation: &'static str, source: RepositoryError) -> ReconcileError {
    ReconcileError::Store {
        key: key.clone(),
        operation,
        source,
    }
}

/// Flip a live `Failed` condition back to false once a pass succeeds.
fn clear_failure(state: &mut GeneratorState, now: DateTime<Utc>) -> bool {
    match state.condition(ConditionType::Failed) {
        Some(failed) if failed.is_true() => state.set_condition(Condition::new(
            ConditionType::Failed,
            false,
            reason::RECOVERED,
            "",
            now,
        )),
        _ => false,
    }
}

pub struct GeneratorStateReconciler {
    repository: Arc<dyn GeneratorStateRepository>,
    registry: Arc<GeneratorRegistry>,
    resources: Arc<dyn ResourceAccessor>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
}

impl GeneratorStateReconciler {
    pub fn new(
        repository: Arc<dyn GeneratorStateRepository>,
        registry: Arc<GeneratorRegistry>,
        resources: Arc<dyn ResourceAccessor>,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            repository,
            registry,
            resources,
            clock,
            event_bus,
        }
    }

    /// Run one reconciliation pass for `key`.
    pub async fn reconcile(
        &self,
        ctx: &OperationContext,
        key: &StateKey,
    ) -> Result<ReconcileAction, ReconcileError> {
        if ctx.is_cancelled() {
            return Err(ReconcileError::Cancelled { key: key.clone() });
        }
        let started = Instant::now();

        let state = self
            .repository
            .find_by_key(key)
            .await
            .map_err(|source| store_error(key, "fetch", source))?;
        let Some(state) = state else {
            debug!("Generator state {} no longer exists", key);
            return Ok(ReconcileAction::Done);
        };

        let phase = state.phase();
        debug!(key = %key, phase = %phase, "Reconciling generator state");
        let result = match phase {
            LifecyclePhase::New => self.adopt(state).await,
            LifecyclePhase::Active => self.evaluate_gc(ctx, state).await,
            LifecyclePhase::Terminating => self.finalize(ctx, state).await,
            LifecyclePhase::Gone => {
                debug!("Generator state {} already finalized", key);
                Ok(ReconcileAction::Done)
            }
        };

        let outcome = match &result {
            Ok(ReconcileAction::Done) => "done",
            Ok(ReconcileAction::RequeueAfter(_)) => "requeue",
            Err(_) => "error",
        };
        counter!("ephemera_reconcile_total", "phase" => phase.as_str(), "result" => outcome)
            .increment(1);
        histogram!("ephemera_reconcile_duration_seconds").record(started.elapsed().as_secs_f64());

        result
    }

    /// New: claim the record with our finalizer and stop. The next pass
    /// runs once the write is observed.
    async fn adopt(&self, mut state: GeneratorState) -> Result<ReconcileAction, ReconcileError> {
        let key = state.key();
        state.add_finalizer();
        self.repository
            .update(&state)
            .await
            .map_err(|source| store_error(&key, "add finalizer", source))?;

        info!("Added finalizer to generator state {}", key);
        self.event_bus
            .publish_state_event(GeneratorStateEvent::FinalizerAdded {
                key,
                added_at: self.clock.now(),
            });
        Ok(ReconcileAction::Done)
    }

    /// Active: decide whether the record is due for garbage collection.
    async fn evaluate_gc(
        &self,
        ctx: &OperationContext,
        mut state: GeneratorState,
    ) -> Result<ReconcileAction, ReconcileError> {
        let key = state.key();
        let now = self.clock.now();

        let Some(deadline) = state.spec.garbage_collection_deadline else {
            let mut changed = state.set_condition(Condition::new(
                ConditionType::Ready,
                true,
                reason::CREATED,
                READY_MESSAGE,
                now,
            ));
            changed |= clear_failure(&mut state, now);
            if changed {
                self.write_status(&state, "mark ready").await?;
                info!("Generator state {} is ready", key);
                self.event_bus
                    .publish_state_event(GeneratorStateEvent::Ready { key, ready_at: now });
            }
            return Ok(ReconcileAction::Done);
        };

        let (resource, generator) = match self.resolve(&state) {
            Ok(resolved) => resolved,
            Err(failure) => return Err(self.fail_resolution(state, failure).await),
        };

        // Evaluated on every pass: a generator may change its policy at any time.
        let policy = match ctx.run(generator.cleanup_policy(&resource)).await {
            Ok(policy) => policy,
            Err(source) => return Err(self.fail_policy(state, source).await),
        };

        match policy {
            Some(CleanupPolicy::Idle { idle_timeout }) => {
                self.evaluate_idle(ctx, state, &resource, generator.as_ref(), idle_timeout, now)
                    .await
            }
            Some(CleanupPolicy::Deadline) | None => {
                if now >= deadline {
                    self.request_deletion(
                        state,
                        reason::DEADLINE_REACHED,
                        format!("garbage collection deadline {} reached", deadline.to_rfc3339()),
                        now,
                    )
                    .await
                } else {
                    let after = (deadline - now).to_std().unwrap_or(Duration::ZERO);
                    self.schedule(
                        state,
                        reason::GARBAGE_COLLECTION_SET,
                        format!("scheduled for deletion at {}", deadline.to_rfc3339()),
                        after,
                        now,
                    )
                    .await
                }
            }
        }
    }

    async fn evaluate_idle(
        &self,
        ctx: &OperationContext,
        state: GeneratorState,
        resource: &GeneratorResource,
        generator: &dyn Generator,
        idle_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<ReconcileAction, ReconcileError> {
        if idle_timeout.is_zero() {
            let source = GeneratorError::ConfigInvalid(
                "idle cleanup policy requires a non-zero idle timeout".into(),
            );
            return Err(self.fail_policy(state, source).await);
        }

        let decision = idle_probe::probe(
            ctx,
            generator,
            resource,
            state.spec.state.as_ref(),
            self.resources.as_ref(),
            &state.metadata.namespace,
            idle_timeout,
            now,
        )
        .await;
        let decision = match decision {
            Ok(decision) => decision,
            Err(source) => return Err(self.fail_policy(state, source).await),
        };

        let timeout_secs = idle_timeout.as_secs();
        match decision.requeue_after(idle_timeout) {
            Some(delay) => {
                let message = match decision {
                    idle_probe::IdleDecision::Unknown => {
                        format!("no activity signal yet; idle timeout is {}s", timeout_secs)
                    }
                    _ => format!("credential used within idle timeout of {}s", timeout_secs),
                };
                self.schedule(state, reason::STILL_ACTIVE, message, delay, now)
                    .await
            }
            None => {
                debug!("Generator state {} idle: {:?}", state.key(), decision);
                self.request_deletion(
                    state,
                    reason::IDLE_TIMEOUT_REACHED,
                    format!("no activity within idle timeout of {}s", timeout_secs),
                    now,
                )
                .await
            }
        }
    }

    async fn schedule(
        &self,
        mut state: GeneratorState,
        reason: &'static str,
        message: String,
        after: Duration,
        now: DateTime<Utc>,
    ) -> Result<ReconcileAction, ReconcileError> {
        let key = state.key();
        let mut changed = state.set_condition(Condition::new(
            ConditionType::DeletionScheduled,
            true,
            reason,
            message,
            now,
        ));
        changed |= clear_failure(&mut state, now);

        if changed {
            self.write_status(&state, "schedule deletion").await?;
            info!(
                key = %key,
                reason,
                requeue_after_secs = after.as_secs(),
                "Generator state scheduled for garbage collection"
            );
            self.event_bus
                .publish_state_event(GeneratorStateEvent::DeletionScheduled {
                    key,
                    reason: reason.to_string(),
                    requeue_after_ms: after.as_millis() as u64,
                    scheduled_at: now,
                });
        } else {
            debug!("Generator state {} still scheduled, re-check in {:?}", key, after);
        }
        Ok(ReconcileAction::RequeueAfter(after))
    }

    /// Mark Terminating and ask the store to delete. Cleanup itself runs on
    /// the pass that observes the deletion timestamp.
    async fn request_deletion(
        &self,
        mut state: GeneratorState,
        reason: &'static str,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<ReconcileAction, ReconcileError> {
        let key = state.key();
        let mut changed = state.set_condition(Condition::new(
            ConditionType::Terminating,
            true,
            reason,
            message,
            now,
        ));
        changed |= clear_failure(&mut state, now);
        if changed {
            self.write_status(&state, "mark terminating").await?;
        }

        self.repository
            .delete(&key)
            .await
            .map_err(|source| store_error(&key, "request deletion", source))?;

        info!(key = %key, reason, "Requested deletion of generator state");
        self.event_bus
            .publish_state_event(GeneratorStateEvent::DeletionRequested {
                key,
                reason: reason.to_string(),
                requested_at: now,
            });
        Ok(ReconcileAction::Done)
    }

    /// Terminating: run Cleanup with the recorded (resource, state) pair and
    /// release the finalizer only if it succeeded.
    async fn finalize(
        &self,
        ctx: &OperationContext,
        mut state: GeneratorState,
    ) -> Result<ReconcileAction, ReconcileError> {
        let key = state.key();
        let (resource, generator) = match self.resolve(&state) {
            Ok(resolved) => resolved,
            Err(failure) => return Err(self.fail_resolution(state, failure).await),
        };
        let kind = resource.kind.clone();

        let outcome = ctx
            .run(generator.cleanup(
                ctx,
                &resource,
                state.spec.state.as_ref(),
                self.resources.as_ref(),
                &key.namespace,
            ))
            .await;

        match outcome {
            Ok(()) => {
                counter!("ephemera_cleanup_total", "kind" => kind.clone(), "result" => "success")
                    .increment(1);
                state.remove_finalizer();
                self.repository
                    .update(&state)
                    .await
                    .map_err(|source| store_error(&key, "remove finalizer", source))?;

                info!(key = %key, kind = %kind, "Cleanup succeeded, finalizer removed");
                self.event_bus
                    .publish_state_event(GeneratorStateEvent::CleanupSucceeded {
                        key,
                        kind,
                        cleaned_at: self.clock.now(),
                    });
                Ok(ReconcileAction::Done)
            }
            Err(GeneratorError::Cancelled) => Err(ReconcileError::Cancelled { key }),
            Err(source) => {
                counter!("ephemera_cleanup_total", "kind" => kind.clone(), "result" => "failure")
                    .increment(1);
                error!(
                    key = %key,
                    kind = %kind,
                    error = %source,
                    "Cleanup failed, finalizer retained"
                );

                let now = self.clock.now();
                if state.set_condition(Condition::new(
                    ConditionType::Failed,
                    true,
                    reason::CLEANUP_ERROR,
                    format!("cleanup failed: {}", source),
                    now,
                )) {
                    if let Err(e) = self.repository.update_status(&state).await {
                        warn!("Failed to record cleanup failure on {}: {}", key, e);
                    }
                }

                self.event_bus
                    .publish_state_event(GeneratorStateEvent::CleanupFailed {
                        key: key.clone(),
                        kind: kind.clone(),
                        error: source.to_string(),
                        failed_at: now,
                    });
                Err(ReconcileError::Cleanup { key, kind, source })
            }
        }
    }

    fn resolve(
        &self,
        state: &GeneratorState,
    ) -> Result<(GeneratorResource, Arc<dyn Generator>), ResolutionFailure> {
        let resource = state.decode_resource().map_err(|e| ResolutionFailure {
            reason: reason::INVALID_RESOURCE,
            message: format!("stored generator resource cannot be decoded: {}", e),
        })?;
        let generator = self
            .registry
            .lookup(&resource.kind)
            .ok_or_else(|| ResolutionFailure {
                reason: reason::GENERATOR_NOT_FOUND,
                message: format!("no generator registered for kind '{}'", resource.kind),
            })?;
        Ok((resource, generator))
    }

    async fn fail_resolution(
        &self,
        mut state: GeneratorState,
        failure: ResolutionFailure,
    ) -> ReconcileError {
        let key = state.key();
        error!(
            key = %key,
            phase = %state.phase(),
            reason = failure.reason,
            "Cannot resolve generator: {}",
            failure.message
        );

        let now = self.clock.now();
        if state.set_condition(Condition::new(
            ConditionType::Failed,
            true,
            failure.reason,
            failure.message.clone(),
            now,
        )) {
            if let Err(e) = self.write_status(&state, "record resolution failure").await {
                return e;
            }
        }

        self.event_bus
            .publish_state_event(GeneratorStateEvent::ResolutionFailed {
                key: key.clone(),
                reason: failure.reason.to_string(),
                error: failure.message.clone(),
                failed_at: now,
            });
        ReconcileError::Resolution {
            key,
            reason: failure.reason,
            message: failure.message,
        }
    }

    async fn fail_policy(
        &self,
        mut state: GeneratorState,
        source: GeneratorError,
    ) -> ReconcileError {
        let key = state.key();
        if matches!(source, GeneratorError::Cancelled) {
            return ReconcileError::Cancelled { key };
        }
        error!(key = %key, error = %source, "Cleanup policy evaluation failed");

        if state.set_condition(Condition::new(
            ConditionType::Failed,
            true,
            reason::POLICY_ERROR,
            format!("cleanup policy evaluation failed: {}", source),
            self.clock.now(),
        )) {
            if let Err(e) = self.write_status(&state, "record policy failure").await {
                return e;
            }
        }
        ReconcileError::Policy { key, source }
    }

    async fn write_status(
        &self,
        state: &GeneratorState,
        operation: &'static str,
    ) -> Result<GeneratorState, ReconcileError> {
        self.repository
            .update_status(state)
            .await
            .map_err(|source| store_error(&state.key(), operation, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StateKey {
        StateKey::new("default", "token-1")
    }

    #[test]
    fn test_only_resolution_errors_are_terminal() {
        let resolution = ReconcileError::Resolution {
            key: key(),
            reason: reason::GENERATOR_NOT_FOUND,
            message: "no generator registered for kind 'vault'".into(),
        };
        assert!(!resolution.is_retryable());

        let policy = ReconcileError::Policy {
            key: key(),
            source: GeneratorError::ConfigInvalid("bad".into()),
        };
        assert!(policy.is_retryable());

        let cleanup = ReconcileError::Cleanup {
            key: key(),
            kind: "token".into(),
            source: GeneratorError::NotFound("service account".into()),
        };
        assert!(cleanup.is_retryable());
        assert!(ReconcileError::Cancelled { key: key() }.is_retryable());
    }

    #[test]
    fn test_conflict_detection() {
        let conflict = store_error(
            &key(),
            "add finalizer",
            RepositoryError::Conflict {
                key: key().to_string(),
                expected: 3,
            },
        );
        assert!(conflict.is_conflict());
        assert!(conflict.is_retryable());
        assert_eq!(conflict.key(), &key());

        let other = store_error(&key(), "fetch", RepositoryError::Database("down".into()));
        assert!(!other.is_conflict());
    }
}
