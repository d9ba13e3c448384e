// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the controller-core integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::json;

use ephemera_core::application::reconciler::{
    GeneratorStateReconciler, ReconcileAction, ReconcileError,
};
use ephemera_core::domain::clock::{Clock, ManualClock};
use ephemera_core::domain::context::OperationContext;
use ephemera_core::domain::generator::{
    CleanupPolicy, Generated, Generator, GeneratorError, GeneratorResource, OpaqueState,
};
use ephemera_core::domain::generator_state::{GeneratorState, StateKey};
use ephemera_core::domain::repository::{GeneratorStateRepository, RepositoryError};
use ephemera_core::domain::resources::ResourceAccessor;
use ephemera_core::infrastructure::event_bus::EventBus;
use ephemera_core::infrastructure::generators::registry::GeneratorRegistry;
use ephemera_core::infrastructure::repositories::InMemoryGeneratorStateRepository;
use ephemera_core::infrastructure::resources::InMemoryResourceAccessor;

pub const SCRIPTED_KIND: &str = "scripted";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Generator whose answers are set by the test. Cleanup tears down an
/// external object named by `state.id` and records every call.
#[derive(Default)]
pub struct ScriptedGenerator {
    policy: Mutex<Option<CleanupPolicy>>,
    policy_error: Mutex<Option<GeneratorError>>,
    last_activity: Mutex<Option<DateTime<Utc>>>,
    cleanup_failures: Mutex<VecDeque<GeneratorError>>,
    cleanup_calls: Mutex<Vec<(GeneratorResource, Option<OpaqueState>)>>,
    torn_down: Mutex<BTreeSet<String>>,
    side_effects: AtomicUsize,
    policy_calls: AtomicUsize,
    generated: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn set_policy(&self, policy: Option<CleanupPolicy>) {
        *self.policy.lock() = policy;
    }

    pub fn fail_policy(&self, error: Option<GeneratorError>) {
        *self.policy_error.lock() = error;
    }

    pub fn set_last_activity(&self, at: Option<DateTime<Utc>>) {
        *self.last_activity.lock() = at;
    }

    pub fn fail_next_cleanup(&self, error: GeneratorError) {
        self.cleanup_failures.lock().push_back(error);
    }

    pub fn cleanup_calls(&self) -> Vec<(GeneratorResource, Option<OpaqueState>)> {
        self.cleanup_calls.lock().clone()
    }

    pub fn torn_down(&self) -> BTreeSet<String> {
        self.torn_down.lock().clone()
    }

    /// External deletions actually performed.
    pub fn side_effects(&self) -> usize {
        self.side_effects.load(Ordering::SeqCst)
    }

    pub fn policy_calls(&self) -> usize {
        self.policy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        _ctx: &OperationContext,
        resource: &GeneratorResource,
        _resources: &dyn ResourceAccessor,
        _namespace: &str,
    ) -> Result<Generated, GeneratorError> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst);
        let stateless = resource.spec.get("stateless").and_then(|v| v.as_bool()).unwrap_or(false);
        let data = BTreeMap::from([("token".to_string(), format!("tok-{}", n).into_bytes())]);
        if stateless {
            return Ok(Generated::stateless(data));
        }
        Ok(Generated::with_state(data, json!({ "id": format!("sa-{}", n) })))
    }

    async fn cleanup(
        &self,
        _ctx: &OperationContext,
        resource: &GeneratorResource,
        state: Option<&OpaqueState>,
        _resources: &dyn ResourceAccessor,
        _namespace: &str,
    ) -> Result<(), GeneratorError> {
        self.cleanup_calls
            .lock()
            .push((resource.clone(), state.cloned()));
        if let Some(error) = self.cleanup_failures.lock().pop_front() {
            return Err(error);
        }
        let id = state
            .and_then(|s| s.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if self.torn_down.lock().insert(id) {
            self.side_effects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn cleanup_policy(
        &self,
        _resource: &GeneratorResource,
    ) -> Result<Option<CleanupPolicy>, GeneratorError> {
        self.policy_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.policy_error.lock().clone() {
            return Err(error);
        }
        Ok(*self.policy.lock())
    }

    async fn last_activity_time(
        &self,
        _ctx: &OperationContext,
        _resource: &GeneratorResource,
        _state: Option<&OpaqueState>,
        _resources: &dyn ResourceAccessor,
        _namespace: &str,
    ) -> Result<Option<DateTime<Utc>>, GeneratorError> {
        Ok(*self.last_activity.lock())
    }
}

/// Repository wrapper that can be told to fail the next write.
pub struct FlakyRepository {
    inner: InMemoryGeneratorStateRepository,
    conflicting_updates: AtomicUsize,
    fail_creates: AtomicBool,
}

impl FlakyRepository {
    pub fn new(inner: InMemoryGeneratorStateRepository) -> Self {
        Self {
            inner,
            conflicting_updates: AtomicUsize::new(0),
            fail_creates: AtomicBool::new(false),
        }
    }

    pub fn conflict_next_update(&self) {
        self.conflict_updates(1);
    }

    /// Reject the next `n` updates with a write conflict.
    pub fn conflict_updates(&self, n: usize) {
        self.conflicting_updates.store(n, Ordering::SeqCst);
    }

    pub fn fail_creates(&self) {
        self.fail_creates.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl GeneratorStateRepository for FlakyRepository {
    async fn create(&self, state: &GeneratorState) -> Result<GeneratorState, RepositoryError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database("connection reset".to_string()));
        }
        self.inner.create(state).await
    }

    async fn find_by_key(&self, key: &StateKey) -> Result<Option<GeneratorState>, RepositoryError> {
        self.inner.find_by_key(key).await
    }

    async fn list_all(&self) -> Result<Vec<GeneratorState>, RepositoryError> {
        self.inner.list_all().await
    }

    async fn find_by_labels(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<GeneratorState>, RepositoryError> {
        self.inner.find_by_labels(namespace, selector).await
    }

    async fn update(&self, state: &GeneratorState) -> Result<GeneratorState, RepositoryError> {
        let conflict = self
            .conflicting_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflict {
            return Err(RepositoryError::Conflict {
                key: state.key().to_string(),
                expected: state.metadata.resource_version,
            });
        }
        self.inner.update(state).await
    }

    async fn update_status(
        &self,
        state: &GeneratorState,
    ) -> Result<GeneratorState, RepositoryError> {
        self.inner.update_status(state).await
    }

    async fn delete(&self, key: &StateKey) -> Result<Option<GeneratorState>, RepositoryError> {
        self.inner.delete(key).await
    }
}

pub fn scripted_registry(generator: Arc<ScriptedGenerator>) -> Arc<GeneratorRegistry> {
    let mut builder = GeneratorRegistry::builder();
    builder
        .register(SCRIPTED_KIND, generator)
        .expect("register scripted generator");
    Arc::new(builder.build())
}

/// Reconciler wired to a manual clock, an in-memory store and one scripted
/// generator.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: InMemoryGeneratorStateRepository,
    pub repository: Arc<dyn GeneratorStateRepository>,
    pub generator: Arc<ScriptedGenerator>,
    pub event_bus: Arc<EventBus>,
    pub reconciler: GeneratorStateReconciler,
}

impl Harness {
    pub fn new() -> Self {
        let store = InMemoryGeneratorStateRepository::new();
        Self::with_repository(store.clone(), Arc::new(store))
    }

    pub fn with_repository(
        store: InMemoryGeneratorStateRepository,
        repository: Arc<dyn GeneratorStateRepository>,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let generator = Arc::new(ScriptedGenerator::default());
        let event_bus = Arc::new(EventBus::new(64));
        let reconciler = GeneratorStateReconciler::new(
            repository.clone(),
            scripted_registry(generator.clone()),
            Arc::new(InMemoryResourceAccessor::new()),
            clock.clone(),
            event_bus.clone(),
        );
        Self {
            clock,
            store,
            repository,
            generator,
            event_bus,
            reconciler,
        }
    }

    pub fn record(
        &self,
        name: &str,
        kind: &str,
        deadline: Option<DateTime<Utc>>,
    ) -> GeneratorState {
        let mut state = GeneratorState::new(
            StateKey::new("default", name),
            &GeneratorResource::new(kind, json!({"scope": "read"})),
            Some(json!({ "id": format!("sa-{}", name) })),
            self.clock.now(),
        )
        .expect("build record");
        state.spec.garbage_collection_deadline = deadline;
        state
    }

    /// New record, no finalizer yet.
    pub async fn seed(&self, name: &str, deadline: Option<DateTime<Utc>>) -> StateKey {
        let state = self.record(name, SCRIPTED_KIND, deadline);
        self.store.create(&state).await.expect("create record");
        state.key()
    }

    /// Record that already went through its first pass.
    pub async fn seed_active(&self, name: &str, deadline: Option<DateTime<Utc>>) -> StateKey {
        let key = self.seed(name, deadline).await;
        assert_eq!(self.reconcile(&key).await.expect("adopt"), ReconcileAction::Done);
        key
    }

    pub async fn reconcile(&self, key: &StateKey) -> Result<ReconcileAction, ReconcileError> {
        self.reconciler
            .reconcile(&OperationContext::background(), key)
            .await
    }

    pub async fn get(&self, key: &StateKey) -> Option<GeneratorState> {
        self.store.find_by_key(key).await.expect("find record")
    }
}
