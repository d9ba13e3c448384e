// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the generator-state manager: recording generated
//! state, rollback when the record cannot be stored, and retiring earlier
//! generations of the same owner slot.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde_json::json;

use common::{scripted_registry, t0, FlakyRepository, ScriptedGenerator, SCRIPTED_KIND};
use ephemera_core::application::state_manager::{
    GenerateRequest, GeneratorStateManager, StateManagerError,
};
use ephemera_core::domain::clock::{Clock, ManualClock};
use ephemera_core::domain::context::OperationContext;
use ephemera_core::domain::generator::GeneratorResource;
use ephemera_core::domain::generator_state::{LABEL_OWNER, LABEL_STATE_KEY};
use ephemera_core::domain::repository::GeneratorStateRepository;
use ephemera_core::infrastructure::repositories::InMemoryGeneratorStateRepository;
use ephemera_core::infrastructure::resources::InMemoryResourceAccessor;

const GRACE: Duration = Duration::from_secs(120);

struct Fixture {
    clock: Arc<ManualClock>,
    store: InMemoryGeneratorStateRepository,
    generator: Arc<ScriptedGenerator>,
    manager: GeneratorStateManager,
}

fn fixture_with(repository: Option<Arc<dyn GeneratorStateRepository>>) -> Fixture {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = InMemoryGeneratorStateRepository::new();
    let generator = Arc::new(ScriptedGenerator::default());
    let repository = repository.unwrap_or_else(|| Arc::new(store.clone()));
    let manager = GeneratorStateManager::new(
        repository,
        scripted_registry(generator.clone()),
        Arc::new(InMemoryResourceAccessor::new()),
        clock.clone(),
        GRACE,
    );
    Fixture {
        clock,
        store,
        generator,
        manager,
    }
}

fn request(spec: serde_json::Value) -> GenerateRequest {
    GenerateRequest {
        namespace: "payments".to_string(),
        owner: "db-creds".to_string(),
        state_key: "password".to_string(),
        resource: GeneratorResource::new(SCRIPTED_KIND, spec),
        ttl: None,
    }
}

#[tokio::test]
async fn test_generate_records_state_with_owner_labels() {
    let f = fixture_with(None);
    let ctx = OperationContext::background();

    let outcome = f.manager.generate(&ctx, &request(json!({}))).await.unwrap();
    assert_eq!(outcome.data["token"], b"tok-0".to_vec());
    assert_eq!(outcome.retired, 0);

    let record = outcome.state.unwrap();
    assert_eq!(record.metadata.namespace, "payments");
    assert!(record.metadata.name.starts_with("password-"));
    assert_eq!(record.label(LABEL_OWNER), Some("db-creds"));
    assert_eq!(record.label(LABEL_STATE_KEY), Some("password"));
    assert_eq!(record.spec.state, Some(json!({"id": "sa-0"})));
    assert!(record.spec.garbage_collection_deadline.is_none());
    assert_eq!(record.decode_resource().unwrap().kind, SCRIPTED_KIND);
    assert_eq!(f.store.len(), 1);
}

#[tokio::test]
async fn test_stateless_generation_creates_no_record() {
    let f = fixture_with(None);
    let outcome = f
        .manager
        .generate(&OperationContext::background(), &request(json!({"stateless": true})))
        .await
        .unwrap();
    assert!(outcome.state.is_none());
    assert!(f.store.is_empty());
}

#[tokio::test]
async fn test_ttl_sets_deadline() {
    let f = fixture_with(None);
    let mut req = request(json!({}));
    req.ttl = Some(Duration::from_secs(3600));

    let record = f
        .manager
        .generate(&OperationContext::background(), &req)
        .await
        .unwrap()
        .state
        .unwrap();
    assert_eq!(
        record.spec.garbage_collection_deadline,
        Some(t0() + ChronoDuration::hours(1))
    );
}

#[tokio::test]
async fn test_new_generation_retires_previous_with_grace_period() {
    let f = fixture_with(None);
    let ctx = OperationContext::background();

    let first = f.manager.generate(&ctx, &request(json!({}))).await.unwrap().state.unwrap();
    f.clock.advance(ChronoDuration::minutes(5));
    let second = f.manager.generate(&ctx, &request(json!({}))).await.unwrap();
    assert_eq!(second.retired, 1);

    let retired = f.store.find_by_key(&first.key()).await.unwrap().unwrap();
    assert_eq!(
        retired.spec.garbage_collection_deadline,
        Some(f.clock.now() + ChronoDuration::seconds(120))
    );
    let current = second.state.unwrap();
    let current = f.store.find_by_key(&current.key()).await.unwrap().unwrap();
    assert!(current.spec.garbage_collection_deadline.is_none());
}

#[tokio::test]
async fn test_retirement_never_postpones_an_earlier_deadline() {
    let f = fixture_with(None);
    let ctx = OperationContext::background();
    let mut req = request(json!({}));
    req.ttl = Some(Duration::from_secs(30));

    let first = f.manager.generate(&ctx, &req).await.unwrap().state.unwrap();
    let outcome = f.manager.generate(&ctx, &request(json!({}))).await.unwrap();
    assert_eq!(outcome.retired, 0);

    let unchanged = f.store.find_by_key(&first.key()).await.unwrap().unwrap();
    assert_eq!(
        unchanged.spec.garbage_collection_deadline,
        Some(t0() + ChronoDuration::seconds(30))
    );
}

#[tokio::test]
async fn test_retirement_survives_a_write_conflict() {
    let store = InMemoryGeneratorStateRepository::new();
    let flaky = Arc::new(FlakyRepository::new(store.clone()));
    let f = fixture_with(Some(flaky.clone()));
    let ctx = OperationContext::background();

    let first = f.manager.generate(&ctx, &request(json!({}))).await.unwrap().state.unwrap();
    flaky.conflict_next_update();

    let second = f.manager.generate(&ctx, &request(json!({}))).await.unwrap();
    assert_eq!(second.retired, 1);
    let retired = store.find_by_key(&first.key()).await.unwrap().unwrap();
    assert_eq!(
        retired.spec.garbage_collection_deadline,
        Some(t0() + ChronoDuration::seconds(120))
    );
}

#[tokio::test]
async fn test_retirement_that_keeps_conflicting_is_reported() {
    let store = InMemoryGeneratorStateRepository::new();
    let flaky = Arc::new(FlakyRepository::new(store.clone()));
    let f = fixture_with(Some(flaky.clone()));
    let ctx = OperationContext::background();

    let first = f.manager.generate(&ctx, &request(json!({}))).await.unwrap().state.unwrap();
    flaky.conflict_updates(usize::MAX);

    let err = f.manager.generate(&ctx, &request(json!({}))).await.unwrap_err();
    assert!(matches!(&err, StateManagerError::Retire { key, .. } if *key == first.key()));
    assert!(err.is_retryable());
    let untouched = store.find_by_key(&first.key()).await.unwrap().unwrap();
    assert!(untouched.spec.garbage_collection_deadline.is_none());

    // The caller's retry retires both earlier generations.
    flaky.conflict_updates(0);
    let retry = f.manager.generate(&ctx, &request(json!({}))).await.unwrap();
    assert_eq!(retry.retired, 2);
}

#[tokio::test]
async fn test_persist_failure_rolls_back_generated_state() {
    let store = InMemoryGeneratorStateRepository::new();
    let flaky = Arc::new(FlakyRepository::new(store.clone()));
    flaky.fail_creates();
    let f = fixture_with(Some(flaky));

    let err = f
        .manager
        .generate(&OperationContext::background(), &request(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, StateManagerError::Persist { .. }));

    let calls = f.generator.cleanup_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, Some(json!({"id": "sa-0"})));
    assert_eq!(f.generator.side_effects(), 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_failed_rollback_is_reported() {
    let store = InMemoryGeneratorStateRepository::new();
    let flaky = Arc::new(FlakyRepository::new(store.clone()));
    flaky.fail_creates();
    let f = fixture_with(Some(flaky));
    f.generator.fail_next_cleanup(
        ephemera_core::domain::generator::GeneratorError::BackendUnavailable("iam down".into()),
    );

    let err = f
        .manager
        .generate(&OperationContext::background(), &request(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, StateManagerError::RollbackFailed { .. }));
}

#[tokio::test]
async fn test_unknown_kind_is_rejected_before_generation() {
    let f = fixture_with(None);
    let mut req = request(json!({}));
    req.resource = GeneratorResource::new("vault", json!({}));

    let err = f
        .manager
        .generate(&OperationContext::background(), &req)
        .await
        .unwrap_err();
    assert!(matches!(err, StateManagerError::UnknownKind(kind) if kind == "vault"));
}

#[tokio::test]
async fn test_release_owner_schedules_immediate_gc() {
    let f = fixture_with(None);
    let ctx = OperationContext::background();
    let mut other_slot = request(json!({}));
    other_slot.state_key = "username".to_string();

    f.manager.generate(&ctx, &request(json!({}))).await.unwrap();
    f.manager.generate(&ctx, &other_slot).await.unwrap();

    f.clock.advance(ChronoDuration::minutes(1));
    let released = f.manager.release_owner("payments", "db-creds").await.unwrap();
    assert_eq!(released, 2);

    for record in f.store.list_all().await.unwrap() {
        assert_eq!(record.spec.garbage_collection_deadline, Some(f.clock.now()));
    }
    assert_eq!(f.manager.release_owner("payments", "nobody").await.unwrap(), 0);
}
