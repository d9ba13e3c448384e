// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests for the work-queue controller: records flow from the
//! store's watch stream through the workers to cleanup, in real time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{scripted_registry, ScriptedGenerator, SCRIPTED_KIND};
use ephemera_core::application::controller::GeneratorStateController;
use ephemera_core::application::reconciler::GeneratorStateReconciler;
use ephemera_core::domain::clock::SystemClock;
use ephemera_core::domain::condition::ConditionType;
use ephemera_core::domain::controller_config::{BackoffConfig, ControllerSettings};
use ephemera_core::domain::generator::{GeneratorError, GeneratorResource};
use ephemera_core::domain::generator_state::{GeneratorState, StateKey};
use ephemera_core::domain::repository::GeneratorStateRepository;
use ephemera_core::infrastructure::event_bus::EventBus;
use ephemera_core::infrastructure::repositories::InMemoryGeneratorStateRepository;
use ephemera_core::infrastructure::resources::InMemoryResourceAccessor;

struct Running {
    store: InMemoryGeneratorStateRepository,
    generator: Arc<ScriptedGenerator>,
    controller: Arc<GeneratorStateController>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

fn settings() -> ControllerSettings {
    ControllerSettings {
        workers: 2,
        resync_interval: Duration::from_secs(1),
        operation_timeout: Duration::from_secs(5),
        backoff: BackoffConfig {
            base: Duration::from_millis(10),
            max: Duration::from_millis(100),
        },
    }
}

fn start(store: InMemoryGeneratorStateRepository, event_bus: Arc<EventBus>) -> Running {
    let generator = Arc::new(ScriptedGenerator::default());
    let repository: Arc<dyn GeneratorStateRepository> = Arc::new(store.clone());
    let reconciler = Arc::new(GeneratorStateReconciler::new(
        repository.clone(),
        scripted_registry(generator.clone()),
        Arc::new(InMemoryResourceAccessor::new()),
        Arc::new(SystemClock),
        event_bus.clone(),
    ));
    let controller = Arc::new(GeneratorStateController::new(
        reconciler,
        repository,
        event_bus,
        settings(),
    ));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(controller.clone().run(cancel.clone()));
    Running {
        store,
        generator,
        controller,
        cancel,
        handle,
    }
}

fn watched_store() -> (InMemoryGeneratorStateRepository, Arc<EventBus>) {
    let event_bus = Arc::new(EventBus::new(256));
    let store = InMemoryGeneratorStateRepository::new().with_event_bus(event_bus.clone());
    (store, event_bus)
}

fn record(name: &str) -> GeneratorState {
    GeneratorState::new(
        StateKey::new("default", name),
        &GeneratorResource::new(SCRIPTED_KIND, json!({})),
        Some(json!({ "id": name })),
        Utc::now(),
    )
    .unwrap()
}

/// Poll until `check` holds or five seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn stop(running: Running) {
    running.cancel.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_deadline_record_is_cleaned_up_end_to_end() {
    let (store, bus) = watched_store();
    let running = start(store, bus);

    let state = record("token-a").with_deadline(Utc::now() + ChronoDuration::milliseconds(300));
    let key = state.key();
    running.store.create(&state).await.unwrap();

    let store = running.store.clone();
    let gone = eventually(|| {
        let store = store.clone();
        let key = key.clone();
        async move { store.find_by_key(&key).await.unwrap().is_none() }
    })
    .await;
    assert!(gone, "record was not garbage-collected");
    assert_eq!(running.generator.side_effects(), 1);

    stop(running).await;
}

#[tokio::test]
async fn test_records_present_at_startup_are_picked_up() {
    let (store, bus) = watched_store();
    let mut state = record("preexisting");
    state.add_finalizer();
    store.create(&state).await.unwrap();
    store.delete(&state.key()).await.unwrap();

    let running = start(store, bus);
    let store = running.store.clone();
    let key = state.key();
    assert!(
        eventually(|| {
            let store = store.clone();
            let key = key.clone();
            async move { store.find_by_key(&key).await.unwrap().is_none() }
        })
        .await
    );
    stop(running).await;
}

#[tokio::test]
async fn test_failed_cleanup_is_retried_with_backoff() {
    let (store, bus) = watched_store();
    let running = start(store, bus);
    for _ in 0..2 {
        running
            .generator
            .fail_next_cleanup(GeneratorError::BackendUnavailable("503".into()));
    }

    let mut state = record("token-b");
    state.add_finalizer();
    let key = state.key();
    running.store.create(&state).await.unwrap();
    running.store.delete(&key).await.unwrap();

    let store = running.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            let key = key.clone();
            async move { store.find_by_key(&key).await.unwrap().is_none() }
        })
        .await
    );
    assert_eq!(running.generator.cleanup_calls().len(), 3);
    assert_eq!(running.generator.side_effects(), 1);
    assert_eq!(running.controller.queue().num_requeues(&key), 0);

    stop(running).await;
}

#[tokio::test]
async fn test_record_without_deadline_becomes_ready_and_stays() {
    let (store, bus) = watched_store();
    let running = start(store, bus);

    let state = record("token-c");
    let key = state.key();
    running.store.create(&state).await.unwrap();

    let store = running.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            let key = key.clone();
            async move {
                store
                    .find_by_key(&key)
                    .await
                    .unwrap()
                    .and_then(|s| s.condition(ConditionType::Ready).map(|c| c.is_true()))
                    .unwrap_or(false)
            }
        })
        .await
    );

    let stored = running.store.find_by_key(&key).await.unwrap().unwrap();
    assert!(stored.has_finalizer());
    assert!(!stored.is_being_deleted());
    assert!(running.generator.cleanup_calls().is_empty());

    stop(running).await;
}

#[tokio::test]
async fn test_shutdown_stops_workers() {
    let (store, bus) = watched_store();
    let running = start(store, bus);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let queue = running.controller.queue().clone();
    tokio::time::timeout(Duration::from_secs(2), stop(running))
        .await
        .expect("controller did not stop in time");
    assert!(queue.is_shutting_down());
}
