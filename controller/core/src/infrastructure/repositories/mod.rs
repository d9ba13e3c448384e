// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of
//! [`GeneratorStateRepository`](crate::domain::repository::GeneratorStateRepository).
//!
//! - **InMemoryGeneratorStateRepository** - process-local store with a watch
//!   stream on the event bus; standalone mode and tests
//! - **PostgresGeneratorStateRepository** - durable store; optimistic
//!   concurrency through `resource_version` row predicates
//!
//! Both enforce the same store rules: stale writes conflict, the request
//! envelope and opaque state never change after creation, and a record
//! marked for deletion disappears as soon as its finalizer list is empty.

pub mod postgres_generator_state;

pub use postgres_generator_state::PostgresGeneratorStateRepository;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::clock::{Clock, SystemClock};
use crate::domain::events::StoreEvent;
use crate::domain::generator_state::{GeneratorState, StateKey};
use crate::domain::repository::{GeneratorStateRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;

/// Reject writes that touch fields frozen at creation.
pub(crate) fn ensure_immutable_spec(
    stored: &GeneratorState,
    incoming: &GeneratorState,
) -> Result<(), RepositoryError> {
    if stored.spec.resource != incoming.spec.resource {
        return Err(RepositoryError::Invalid(format!(
            "spec.resource of {} is immutable",
            stored.key()
        )));
    }
    if stored.spec.state != incoming.spec.state {
        return Err(RepositoryError::Invalid(format!(
            "spec.state of {} is immutable",
            stored.key()
        )));
    }
    Ok(())
}

pub(crate) fn ensure_version(
    stored: &GeneratorState,
    incoming: &GeneratorState,
) -> Result<(), RepositoryError> {
    if stored.metadata.resource_version != incoming.metadata.resource_version {
        return Err(RepositoryError::Conflict {
            key: stored.key().to_string(),
            expected: incoming.metadata.resource_version,
        });
    }
    Ok(())
}

fn matches_labels(state: &GeneratorState, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| state.metadata.labels.get(k) == Some(v))
}

#[derive(Clone)]
pub struct InMemoryGeneratorStateRepository {
    states: Arc<RwLock<HashMap<StateKey, GeneratorState>>>,
    clock: Arc<dyn Clock>,
    event_bus: Option<Arc<EventBus>>,
}

impl InMemoryGeneratorStateRepository {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            clock: Arc::new(SystemClock),
            event_bus: None,
        }
    }

    /// Publish a `StoreEvent` for every mutation.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Clock used to stamp deletion timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    fn notify(&self, event: StoreEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish_store_event(event);
        }
    }

    fn notify_changed(&self, state: &GeneratorState) {
        self.notify(StoreEvent::Changed {
            key: state.key(),
            resource_version: state.metadata.resource_version,
        });
    }
}

impl Default for InMemoryGeneratorStateRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GeneratorStateRepository for InMemoryGeneratorStateRepository {
    async fn create(&self, state: &GeneratorState) -> Result<GeneratorState, RepositoryError> {
        let key = state.key();
        let stored = {
            let mut states = self.states.write();
            if states.contains_key(&key) {
                return Err(RepositoryError::AlreadyExists(key.to_string()));
            }
            let mut stored = state.clone();
            stored.metadata.resource_version = 1;
            states.insert(key, stored.clone());
            stored
        };
        debug!("Created generator state {}", stored.key());
        self.notify_changed(&stored);
        Ok(stored)
    }

    async fn find_by_key(&self, key: &StateKey) -> Result<Option<GeneratorState>, RepositoryError> {
        Ok(self.states.read().get(key).cloned())
    }

    async fn list_all(&self) -> Result<Vec<GeneratorState>, RepositoryError> {
        let mut all: Vec<GeneratorState> = self.states.read().values().cloned().collect();
        all.sort_by_key(|s| s.key());
        Ok(all)
    }

    async fn find_by_labels(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<GeneratorState>, RepositoryError> {
        let mut found: Vec<GeneratorState> = self
            .states
            .read()
            .values()
            .filter(|s| s.metadata.namespace == namespace && matches_labels(s, selector))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.metadata.creation_timestamp);
        Ok(found)
    }

    async fn update(&self, state: &GeneratorState) -> Result<GeneratorState, RepositoryError> {
        let key = state.key();
        let (written, removed) = {
            let mut states = self.states.write();
            let stored = states
                .get_mut(&key)
                .ok_or_else(|| RepositoryError::NotFound(key.to_string()))?;
            ensure_version(stored, state)?;
            ensure_immutable_spec(stored, state)?;

            stored.metadata.finalizers = state.metadata.finalizers.clone();
            stored.metadata.labels = state.metadata.labels.clone();
            stored.spec.garbage_collection_deadline = state.spec.garbage_collection_deadline;
            stored.metadata.resource_version += 1;
            let written = stored.clone();

            let removed = written.is_being_deleted() && written.metadata.finalizers.is_empty();
            if removed {
                states.remove(&key);
            }
            (written, removed)
        };

        if removed {
            debug!("Generator state {} finalized and removed", key);
            self.notify(StoreEvent::Removed { key });
        } else {
            self.notify_changed(&written);
        }
        Ok(written)
    }

    async fn update_status(
        &self,
        state: &GeneratorState,
    ) -> Result<GeneratorState, RepositoryError> {
        let key = state.key();
        let written = {
            let mut states = self.states.write();
            let stored = states
                .get_mut(&key)
                .ok_or_else(|| RepositoryError::NotFound(key.to_string()))?;
            ensure_version(stored, state)?;
            stored.status = state.status.clone();
            stored.metadata.resource_version += 1;
            stored.clone()
        };
        self.notify_changed(&written);
        Ok(written)
    }

    async fn delete(&self, key: &StateKey) -> Result<Option<GeneratorState>, RepositoryError> {
        let now = self.clock.now();
        let outcome = {
            let mut states = self.states.write();
            let stored = states
                .get_mut(key)
                .ok_or_else(|| RepositoryError::NotFound(key.to_string()))?;
            if stored.metadata.finalizers.is_empty() {
                states.remove(key);
                None
            } else {
                if stored.metadata.deletion_timestamp.is_none() {
                    stored.metadata.deletion_timestamp = Some(now);
                    stored.metadata.resource_version += 1;
                }
                Some(stored.clone())
            }
        };

        match &outcome {
            Some(state) => self.notify_changed(state),
            None => self.notify(StoreEvent::Removed { key: key.clone() }),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::{reason, Condition, ConditionType};
    use crate::domain::generator::GeneratorResource;
    use crate::infrastructure::event_bus::DomainEvent;
    use chrono::Utc;
    use serde_json::json;

    fn record(name: &str) -> GeneratorState {
        GeneratorState::new(
            StateKey::new("default", name),
            &GeneratorResource::new("fake", json!({})),
            Some(json!({"id": name})),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_duplicate() {
        let repo = InMemoryGeneratorStateRepository::new();
        let stored = repo.create(&record("a")).await.unwrap();
        assert_eq!(stored.metadata.resource_version, 1);

        let err = repo.create(&record("a")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let repo = InMemoryGeneratorStateRepository::new();
        let stored = repo.create(&record("a")).await.unwrap();

        let mut first = stored.clone();
        first.add_finalizer();
        repo.update(&first).await.unwrap();

        let mut stale = stored;
        stale.set_condition(Condition::new(
            ConditionType::Ready,
            true,
            reason::CREATED,
            "",
            Utc::now(),
        ));
        let err = repo.update_status(&stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_spec_is_immutable() {
        let repo = InMemoryGeneratorStateRepository::new();
        let mut stored = repo.create(&record("a")).await.unwrap();
        stored.spec.state = Some(json!({"id": "tampered"}));
        let err = repo.update(&stored).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_delete_without_finalizer_removes_immediately() {
        let repo = InMemoryGeneratorStateRepository::new();
        repo.create(&record("a")).await.unwrap();
        let outcome = repo.delete(&StateKey::new("default", "a")).await.unwrap();
        assert!(outcome.is_none());
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_finalizer_blocks_removal_until_cleared() {
        let repo = InMemoryGeneratorStateRepository::new();
        let mut stored = repo.create(&record("a")).await.unwrap();
        stored.add_finalizer();
        repo.update(&stored).await.unwrap();

        let key = StateKey::new("default", "a");
        let marked = repo.delete(&key).await.unwrap().unwrap();
        assert!(marked.is_being_deleted());
        assert_eq!(repo.len(), 1);

        // second delete is idempotent
        let again = repo.delete(&key).await.unwrap().unwrap();
        assert_eq!(again.metadata.deletion_timestamp, marked.metadata.deletion_timestamp);
        assert_eq!(again.metadata.resource_version, marked.metadata.resource_version);

        let mut finalizing = again;
        finalizing.remove_finalizer();
        repo.update(&finalizing).await.unwrap();
        assert!(repo.find_by_key(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_cannot_clear_deletion_timestamp() {
        let repo = InMemoryGeneratorStateRepository::new();
        let mut stored = repo.create(&record("a")).await.unwrap();
        stored.add_finalizer();
        repo.update(&stored).await.unwrap();
        let mut marked = repo.delete(&stored.key()).await.unwrap().unwrap();

        marked.metadata.deletion_timestamp = None;
        let written = repo.update(&marked).await.unwrap();
        assert!(written.is_being_deleted());
    }

    #[tokio::test]
    async fn test_find_by_labels() {
        let repo = InMemoryGeneratorStateRepository::new();
        repo.create(&record("a").with_label("owner", "es-1")).await.unwrap();
        repo.create(&record("b").with_label("owner", "es-2")).await.unwrap();

        let selector = BTreeMap::from([("owner".to_string(), "es-1".to_string())]);
        let found = repo.find_by_labels("default", &selector).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name, "a");
        assert!(repo.find_by_labels("other", &selector).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mutations_publish_store_events() {
        let bus = Arc::new(EventBus::new(16));
        let mut receiver = bus.subscribe();
        let repo = InMemoryGeneratorStateRepository::new().with_event_bus(bus);

        repo.create(&record("a")).await.unwrap();
        repo.delete(&StateKey::new("default", "a")).await.unwrap();

        assert!(matches!(
            receiver.try_recv().unwrap(),
            DomainEvent::Store(StoreEvent::Changed { resource_version: 1, .. })
        ));
        assert!(matches!(
            receiver.try_recv().unwrap(),
            DomainEvent::Store(StoreEvent::Removed { .. })
        ));
    }
}
