//! Integration tests for the delivery pipeline
//!
//! Drives the coordinator, scheduler and health tracker together over the
//! in-memory store with scripted handlers. Backoff bases are zeroed so
//! retries become due immediately and the tests never sleep.

use std::sync::Arc;

use courier_core::{
    CircuitState, DeliveryLogStatus, Destination, DestinationDeliveryStatus, DestinationId,
    DestinationKind, EntryStatus, HealthStatus, OrgContext, OrganizationId,
};
use courier_delivery::{
    AcceptStatus, CircuitBreakerConfig, CoordinatorConfig, DeliveryCoordinator, DeliveryProcessor,
    DeliveryRequest, DeliveryOptions, DestinationSelector, HandlerRegistry, HealthTracker,
    ProcessorConfig, RequestPayload, RetryPolicy,
    handler::testing::{Outcome, ScriptedError, ScriptedHandler},
};
use courier_store::{DestinationStore, MemoryStore, QueueStore};

struct Harness {
    store: Arc<MemoryStore>,
    coordinator: DeliveryCoordinator,
    processor: Arc<DeliveryProcessor>,
    health: Arc<HealthTracker>,
    ctx: OrgContext,
}

fn zero_backoff() -> RetryPolicy {
    RetryPolicy {
        base_delay_secs: 0,
        jitter_factor: 0.0,
        ..RetryPolicy::default()
    }
}

async fn harness(handler: ScriptedHandler, breaker: CircuitBreakerConfig) -> Harness {
    harness_with_concurrency(handler, breaker, 10).await
}

async fn harness_with_concurrency(
    handler: ScriptedHandler,
    breaker: CircuitBreakerConfig,
    max_concurrent: usize,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let health = Arc::new(HealthTracker::new(store.clone(), breaker));

    let mut registry = HandlerRegistry::new();
    registry.register(DestinationKind::Webhook, Arc::new(handler));

    let processor = Arc::new(DeliveryProcessor::new(
        ProcessorConfig {
            max_concurrent_deliveries: max_concurrent,
            retry: zero_backoff(),
            ..ProcessorConfig::default()
        },
        store.clone(),
        store.clone(),
        store.clone(),
        health.clone(),
        Arc::new(registry),
    ));

    let coordinator = DeliveryCoordinator::new(
        CoordinatorConfig::default(),
        store.clone(),
        store.clone(),
        store.clone(),
        health.clone(),
    );

    Harness {
        store,
        coordinator,
        processor,
        health,
        ctx: OrgContext::new(OrganizationId::new("org-a")),
    }
}

async fn add_destination(store: &MemoryStore, org: &str) -> Destination {
    let destination = Destination::new(
        OrganizationId::new(org),
        DestinationKind::Webhook,
        "hook",
        serde_json::json!({"url": "https://example.com/hook"}),
    );
    DestinationStore::create(store, destination).await.unwrap()
}

fn request(org: &str, destinations: Vec<DestinationId>) -> DeliveryRequest {
    DeliveryRequest {
        organization: OrganizationId::new(org),
        destinations: DestinationSelector::Explicit(destinations),
        payload: RequestPayload {
            kind: "report".to_string(),
            data: serde_json::json!({"n": 1}),
            metadata: ahash::AHashMap::new(),
        },
        options: DeliveryOptions {
            priority: Some(5),
            ..DeliveryOptions::default()
        },
    }
}

#[tokio::test]
async fn test_happy_path_single_destination() {
    let handler = ScriptedHandler::always_succeeding("X-123");
    let h = harness(handler, CircuitBreakerConfig::default()).await;
    let destination = add_destination(&h.store, "org-a").await;

    let response = h
        .coordinator
        .submit(&h.ctx, request("org-a", vec![destination.id]))
        .await
        .unwrap();
    assert_eq!(response.status, DeliveryLogStatus::Queued);
    assert_eq!(response.destinations.len(), 1);
    assert_eq!(response.destinations[0].status, AcceptStatus::Queued);

    let processed = h.processor.process_once().await.unwrap();
    assert_eq!(processed, 1);

    // Entry is terminal completed
    let entries = h
        .store
        .find_by_delivery(response.delivery_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, EntryStatus::Completed);
    assert_eq!(
        entries[0].metadata["cross_system_reference"],
        serde_json::json!("X-123")
    );

    // Health reflects the single success
    let health = h.health.snapshot(destination.id).unwrap();
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(health.total_deliveries, 1);
    assert!((health.average_response_time_ms - 42.0).abs() < f64::EPSILON);

    // Coordinator view aggregates to completed with the handler reference
    let view = h
        .coordinator
        .delivery_status(&h.ctx, response.delivery_id)
        .await
        .unwrap();
    assert_eq!(view.status, DeliveryLogStatus::Completed);
    assert_eq!(
        view.destinations[0].status,
        DestinationDeliveryStatus::Delivered
    );
    assert_eq!(
        view.destinations[0].cross_system_reference.as_deref(),
        Some("X-123")
    );

    // Usage counter was bumped at enqueue
    let stored = DestinationStore::get(h.store.as_ref(), destination.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.usage_count, 1);
}

#[tokio::test]
async fn test_transient_failure_then_recovery() {
    let handler = ScriptedHandler::with_script(vec![
        Outcome::Fail(ScriptedError::ConnectionReset),
        Outcome::Succeed {
            reference: Some("X-2".to_string()),
            response_time_ms: 7,
        },
    ]);
    let h = harness(handler, CircuitBreakerConfig::default()).await;
    let destination = add_destination(&h.store, "org-a").await;

    let response = h
        .coordinator
        .submit(&h.ctx, request("org-a", vec![destination.id]))
        .await
        .unwrap();

    // First tick fails and schedules the retry
    h.processor.process_once().await.unwrap();
    let entries = h
        .store
        .find_by_delivery(response.delivery_id)
        .await
        .unwrap();
    assert_eq!(entries[0].status, EntryStatus::Pending);
    assert_eq!(entries[0].retry_count, 1);
    assert!(entries[0].next_retry_at.is_some());

    let health = h.health.snapshot(destination.id).unwrap();
    assert_eq!(health.consecutive_failures, 1);

    // Second tick succeeds; consecutive failures reset
    h.processor.process_once().await.unwrap();
    let entries = h
        .store
        .find_by_delivery(response.delivery_id)
        .await
        .unwrap();
    assert_eq!(entries[0].status, EntryStatus::Completed);

    let health = h.health.snapshot(destination.id).unwrap();
    assert_eq!(health.consecutive_failures, 0);

    // Two attempt records accumulated in entry metadata
    let attempts = entries[0].metadata["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 2);
}

#[tokio::test]
async fn test_circuit_opens_after_consecutive_failures() {
    let handler = ScriptedHandler::always_failing(ScriptedError::ConnectionReset);
    let h = harness(
        handler,
        CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout_secs: 3600,
            volume_threshold: 0,
            ..CircuitBreakerConfig::default()
        },
    )
    .await;
    let destination = add_destination(&h.store, "org-a").await;

    let response = h
        .coordinator
        .submit(&h.ctx, request("org-a", vec![destination.id]))
        .await
        .unwrap();

    // Five failing attempts trip the circuit
    for _ in 0..5 {
        h.processor.process_once().await.unwrap();
    }
    assert_eq!(h.health.circuit_state(destination.id), CircuitState::Open);
    let health = h.health.snapshot(destination.id).unwrap();
    assert!(health.circuit_opened_at.is_some());
    assert_eq!(health.status, HealthStatus::Unhealthy);

    // The whole retry budget is spent; the next tick meets the open gate
    // and fails the entry terminally without touching the handler
    let entries = h
        .store
        .find_by_delivery(response.delivery_id)
        .await
        .unwrap();
    assert_eq!(entries[0].retry_count, entries[0].max_retries);

    h.processor.process_once().await.unwrap();
    let entries = h
        .store
        .find_by_delivery(response.delivery_id)
        .await
        .unwrap();
    assert_eq!(entries[0].status, EntryStatus::Failed);

    // A fresh entry to the same destination is refused by the gate and
    // rescheduled without touching the handler or health counters
    let failures_before = h.health.snapshot(destination.id).unwrap().total_failures;
    let second = h
        .coordinator
        .submit(&h.ctx, request("org-a", vec![destination.id]))
        .await
        .unwrap();
    // The permit gate already refuses at submission time
    assert!(matches!(
        second.destinations[0].status,
        AcceptStatus::Dropped { .. }
    ));
    assert_eq!(
        h.health.snapshot(destination.id).unwrap().total_failures,
        failures_before
    );
}

#[tokio::test]
async fn test_circuit_refusal_requeues_with_recovery_backoff() {
    let handler = ScriptedHandler::always_succeeding("never called");
    let recorder = handler.clone();
    let h = harness(
        handler,
        CircuitBreakerConfig {
            recovery_timeout_secs: 3600,
            volume_threshold: 0,
            ..CircuitBreakerConfig::default()
        },
    )
    .await;
    let destination = add_destination(&h.store, "org-a").await;

    // Trip the circuit out of band
    h.health.force_open(destination.id, "operator hold").await;

    // Enqueue directly; the coordinator gate would refuse at submit time
    let entry = courier_core::QueueEntry::new(
        OrganizationId::new("org-a"),
        destination.id,
        courier_core::Priority::new(5).unwrap(),
        courier_core::DeliveryPayload {
            delivery_id: courier_core::DeliveryId::generate(),
            kind: "report".to_string(),
            data: serde_json::json!({}),
            metadata: ahash::AHashMap::new(),
        },
        "direct".to_string(),
    );
    let entry = h.store.enqueue(entry).await.unwrap();

    let before = chrono::Utc::now();
    h.processor.process_once().await.unwrap();

    // The handler was never invoked and the entry waits out the recovery
    // timeout, consuming one unit of retry budget
    assert_eq!(recorder.calls(), 0);
    let stored = h.store.find_by_id(entry.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EntryStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    let next_retry = stored.next_retry_at.unwrap();
    assert!(next_retry >= before + chrono::Duration::seconds(3590));

    // The refusal is invisible to destination health
    assert!(h.health.snapshot(destination.id).unwrap().total_failures == 0);
}

#[tokio::test]
async fn test_circuit_recovers_through_half_open() {
    let handler = ScriptedHandler::with_script(vec![
        Outcome::Fail(ScriptedError::ConnectionReset),
        Outcome::Fail(ScriptedError::ConnectionReset),
        Outcome::Succeed {
            reference: None,
            response_time_ms: 3,
        },
    ]);
    let h = harness(
        handler,
        CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout_secs: 0,
            success_threshold: 3,
            volume_threshold: 0,
            ..CircuitBreakerConfig::default()
        },
    )
    .await;
    let destination = add_destination(&h.store, "org-a").await;

    h.coordinator
        .submit(&h.ctx, request("org-a", vec![destination.id]))
        .await
        .unwrap();

    // Two failures open the circuit
    h.processor.process_once().await.unwrap();
    h.processor.process_once().await.unwrap();
    assert_eq!(h.health.circuit_state(destination.id), CircuitState::Open);

    // Zero recovery timeout: the next permits trial the destination; three
    // successes close the circuit again
    h.processor.process_once().await.unwrap();
    assert_eq!(
        h.health.circuit_state(destination.id),
        CircuitState::HalfOpen
    );
    for key in ["b", "c"] {
        let mut next = request("org-a", vec![destination.id]);
        next.options.idempotency_key = Some(key.to_string());
        h.coordinator.submit(&h.ctx, next).await.unwrap();
        h.processor.process_once().await.unwrap();
    }
    assert_eq!(h.health.circuit_state(destination.id), CircuitState::Closed);
    assert!(
        h.health
            .snapshot(destination.id)
            .unwrap()
            .circuit_opened_at
            .is_none()
    );
}

#[tokio::test]
async fn test_fan_out_drops_disabled_and_foreign_destinations() {
    let handler = ScriptedHandler::always_succeeding("ok");
    let h = harness(handler, CircuitBreakerConfig::default()).await;

    let good = add_destination(&h.store, "org-a").await;
    let mut disabled = Destination::new(
        OrganizationId::new("org-a"),
        DestinationKind::Webhook,
        "disabled hook",
        serde_json::json!({}),
    );
    disabled.disable("ops", "broken");
    let disabled = DestinationStore::create(h.store.as_ref(), disabled)
        .await
        .unwrap();
    let foreign = add_destination(&h.store, "org-b").await;

    let response = h
        .coordinator
        .submit(
            &h.ctx,
            request("org-a", vec![good.id, disabled.id, foreign.id]),
        )
        .await
        .unwrap();

    assert_eq!(response.status, DeliveryLogStatus::Queued);
    let by_id = |id| {
        response
            .destinations
            .iter()
            .find(|accept| accept.destination_id == id)
            .unwrap()
    };
    assert_eq!(by_id(good.id).status, AcceptStatus::Queued);
    assert!(matches!(
        by_id(disabled.id).status,
        AcceptStatus::Dropped { .. }
    ));
    assert!(matches!(
        by_id(foreign.id).status,
        AcceptStatus::Dropped { .. }
    ));

    // Only the good destination got a queue entry
    let entries = h
        .store
        .find_by_delivery(response.delivery_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].destination_id, good.id);
}

#[tokio::test]
async fn test_duplicate_idempotency_key_returns_original_delivery() {
    let handler = ScriptedHandler::always_succeeding("ok");
    let h = harness(handler, CircuitBreakerConfig::default()).await;
    let destination = add_destination(&h.store, "org-a").await;

    let mut first = request("org-a", vec![destination.id]);
    first.options.idempotency_key = Some("caller-key".to_string());
    let first_response = h.coordinator.submit(&h.ctx, first).await.unwrap();

    let stats_before = h.store.queue_stats().await.unwrap();

    let mut second = request("org-a", vec![destination.id]);
    second.options.idempotency_key = Some("caller-key".to_string());
    let second_response = h.coordinator.submit(&h.ctx, second).await.unwrap();

    // Same delivery id comes back and no new entry was created
    assert_eq!(second_response.delivery_id, first_response.delivery_id);
    assert_eq!(h.store.queue_stats().await.unwrap(), stats_before);
    assert!(matches!(
        second_response.destinations[0].status,
        AcceptStatus::Duplicate { delivery_id } if delivery_id == first_response.delivery_id
    ));
}

#[tokio::test]
async fn test_single_slot_degenerates_to_serial_priority_order() {
    let handler = ScriptedHandler::always_succeeding("ok");
    let recorder = handler.clone();
    let h = harness_with_concurrency(handler, CircuitBreakerConfig::default(), 1).await;
    let destination = add_destination(&h.store, "org-a").await;

    for (key, priority) in [("low", 1), ("high", 9), ("mid", 5)] {
        let mut req = request("org-a", vec![destination.id]);
        req.options.priority = Some(priority);
        req.options.idempotency_key = Some(key.to_string());
        req.payload.data = serde_json::json!({"tag": key});
        h.coordinator.submit(&h.ctx, req).await.unwrap();
    }

    // One slot: each tick claims and completes exactly one entry
    for _ in 0..3 {
        assert_eq!(h.processor.process_once().await.unwrap(), 1);
    }

    let order: Vec<String> = recorder
        .payloads()
        .iter()
        .map(|payload| payload.payload.data["tag"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(order, vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn test_permanent_error_fails_without_retry() {
    let handler = ScriptedHandler::always_failing(ScriptedError::AuthenticationFailed);
    let h = harness(handler, CircuitBreakerConfig::default()).await;
    let destination = add_destination(&h.store, "org-a").await;

    let response = h
        .coordinator
        .submit(&h.ctx, request("org-a", vec![destination.id]))
        .await
        .unwrap();

    h.processor.process_once().await.unwrap();

    let entries = h
        .store
        .find_by_delivery(response.delivery_id)
        .await
        .unwrap();
    assert_eq!(entries[0].status, EntryStatus::Failed);
    assert_eq!(entries[0].retry_count, 0, "no retry for auth failures");

    let view = h
        .coordinator
        .delivery_status(&h.ctx, response.delivery_id)
        .await
        .unwrap();
    assert_eq!(view.status, DeliveryLogStatus::Failed);
    assert!(
        view.destinations[0]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("authentication failed")
    );
}

#[tokio::test]
async fn test_zero_retry_budget_means_single_attempt() {
    let handler = ScriptedHandler::always_failing(ScriptedError::ConnectionReset);
    let recorder = handler.clone();
    let store = Arc::new(MemoryStore::new());
    let health = Arc::new(HealthTracker::new(
        store.clone(),
        CircuitBreakerConfig::default(),
    ));
    let mut registry = HandlerRegistry::new();
    registry.register(DestinationKind::Webhook, Arc::new(handler));

    let processor = DeliveryProcessor::new(
        ProcessorConfig {
            retry: zero_backoff(),
            ..ProcessorConfig::default()
        },
        store.clone(),
        store.clone(),
        store.clone(),
        health.clone(),
        Arc::new(registry),
    );
    let coordinator = DeliveryCoordinator::new(
        CoordinatorConfig {
            max_retries: 0,
            ..CoordinatorConfig::default()
        },
        store.clone(),
        store.clone(),
        store.clone(),
        health,
    );

    let ctx = OrgContext::new(OrganizationId::new("org-a"));
    let destination = add_destination(&store, "org-a").await;
    let response = coordinator
        .submit(&ctx, request("org-a", vec![destination.id]))
        .await
        .unwrap();

    processor.process_once().await.unwrap();

    // Even a retryable failure is terminal when the budget is zero
    let entries = store.find_by_delivery(response.delivery_id).await.unwrap();
    assert_eq!(entries[0].status, EntryStatus::Failed);
    assert_eq!(entries[0].retry_count, 0);
    assert_eq!(entries[0].max_retries, 0);
    assert_eq!(recorder.calls(), 1);

    // Nothing left to claim
    assert_eq!(processor.process_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_delivery_removes_pending_entries() {
    let handler = ScriptedHandler::always_succeeding("ok");
    let h = harness(handler, CircuitBreakerConfig::default()).await;
    let destination = add_destination(&h.store, "org-a").await;

    let response = h
        .coordinator
        .submit(&h.ctx, request("org-a", vec![destination.id]))
        .await
        .unwrap();

    let cancelled = h
        .processor
        .cancel_delivery(response.delivery_id)
        .await
        .unwrap();
    assert_eq!(cancelled, 1);

    // No pending entry remains for the delivery, and processing finds nothing
    assert_eq!(h.processor.process_once().await.unwrap(), 0);
    let entries = h
        .store
        .find_by_delivery(response.delivery_id)
        .await
        .unwrap();
    assert_eq!(entries[0].status, EntryStatus::Cancelled);
}

#[tokio::test]
async fn test_cross_org_status_query_denied() {
    let handler = ScriptedHandler::always_succeeding("ok");
    let h = harness(handler, CircuitBreakerConfig::default()).await;
    let destination = add_destination(&h.store, "org-a").await;

    let response = h
        .coordinator
        .submit(&h.ctx, request("org-a", vec![destination.id]))
        .await
        .unwrap();

    let foreign_ctx = OrgContext::new(OrganizationId::new("org-b"));
    let error = h
        .coordinator
        .delivery_status(&foreign_ctx, response.delivery_id)
        .await
        .expect_err("cross-org status query must fail");
    assert!(matches!(
        error,
        courier_delivery::CoordinatorError::Scope(_)
    ));
}

#[tokio::test]
async fn test_oversize_payload_rejected_at_the_boundary() {
    let handler = ScriptedHandler::always_succeeding("ok");
    let store = Arc::new(MemoryStore::new());
    let health = Arc::new(HealthTracker::new(
        store.clone(),
        CircuitBreakerConfig::default(),
    ));
    let mut registry = HandlerRegistry::new();
    registry.register(DestinationKind::Webhook, Arc::new(handler));

    let coordinator = DeliveryCoordinator::new(
        CoordinatorConfig {
            max_payload_bytes: 64,
            ..CoordinatorConfig::default()
        },
        store.clone(),
        store.clone(),
        store.clone(),
        health,
    );
    let ctx = OrgContext::new(OrganizationId::new("org-a"));
    let destination = add_destination(&store, "org-a").await;

    // Exactly at the limit is accepted: `{"pad":"....."}` is 64 bytes
    let mut at_limit = request("org-a", vec![destination.id]);
    at_limit.payload.data = serde_json::json!({"pad": "x".repeat(54)});
    assert_eq!(
        serde_json::to_vec(&at_limit.payload.data).unwrap().len(),
        64
    );
    coordinator.submit(&ctx, at_limit).await.unwrap();

    // One byte over is rejected with a validation error
    let mut over_limit = request("org-a", vec![destination.id]);
    over_limit.payload.data = serde_json::json!({"pad": "x".repeat(55)});
    over_limit.options.idempotency_key = Some("other".to_string());
    let error = coordinator.submit(&ctx, over_limit).await.expect_err("payload over limit");
    assert!(matches!(
        error,
        courier_delivery::CoordinatorError::Validation(
            courier_delivery::ValidationError::PayloadTooLarge { size: 65, limit: 64 }
        )
    ));
}
