//! Per-entry worker task
//!
//! One worker processes exactly one claimed queue entry: resolve the
//! destination, consult the circuit gate, invoke the handler under its
//! timeout, then fold the outcome into the store, the health tracker, and
//! the delivery log. Every error is absorbed here; store failures on the
//! result path are logged and left for the stuck sweep.

use std::collections::HashMap;

use chrono::Utc;
use courier_core::{
    DeliveryAttempt, DeliveryLogRecord, Destination, EntryStatus, QueueEntry,
};
use courier_store::{DeliveryLogStore, DestinationStore, QueueStore};

use crate::{
    error::{DeliveryError, ErrorKind},
    handler::{HandlerPayload, HandlerSuccess},
    processor::WorkerContext,
};

/// Process one claimed entry end to end
pub(crate) async fn process_entry(ctx: &WorkerContext, entry: QueueEntry) {
    let destination = match ctx.destinations.get(entry.destination_id).await {
        Ok(Some(destination)) => destination,
        Ok(None) => {
            // The destination was deleted while work was queued
            fail_terminal(
                ctx,
                &entry,
                &DeliveryError::DestinationNotFound("destination removed".to_string()),
            )
            .await;
            return;
        }
        Err(error) => {
            // Lookup failure is scoped to this entry and retried as transient
            let error = DeliveryError::Store(error.to_string());
            handle_failure(ctx, &entry, None, &error, 0).await;
            return;
        }
    };

    if !ctx.health.permit(destination.id) {
        handle_failure(ctx, &entry, Some(&destination), &DeliveryError::CircuitOpen, 0).await;
        return;
    }

    let outcome = invoke_handler(ctx, &entry, &destination).await;

    match outcome {
        Ok(success) => handle_success(ctx, &entry, &destination, &success).await,
        Err((error, elapsed_ms)) => {
            handle_failure(ctx, &entry, Some(&destination), &error, elapsed_ms).await;
        }
    }
}

/// Invoke the kind handler under its timeout, measuring wall time
async fn invoke_handler(
    ctx: &WorkerContext,
    entry: &QueueEntry,
    destination: &Destination,
) -> Result<HandlerSuccess, (DeliveryError, u64)> {
    let Some(handler) = ctx.registry.get(destination.kind) else {
        return Err((
            DeliveryError::InvalidConfig(format!(
                "no handler registered for kind {}",
                destination.kind
            )),
            0,
        ));
    };

    let payload = HandlerPayload {
        payload: entry.payload.clone(),
        entry_id: entry.id,
        attempt: entry.attempt_number(),
        scheduled_at: entry.scheduled_at,
        processing_at: Utc::now(),
    };

    let started = std::time::Instant::now();
    let result = tokio::time::timeout(
        handler.timeout(),
        handler.deliver(&payload, &destination.config),
    )
    .await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(Ok(success)) => Ok(success),
        Ok(Err(error)) => Err((error, elapsed_ms)),
        Err(_) => Err((
            DeliveryError::Timeout(format!(
                "handler for kind {} exceeded {:?}",
                destination.kind,
                handler.timeout()
            )),
            elapsed_ms,
        )),
    }
}

async fn handle_success(
    ctx: &WorkerContext,
    entry: &QueueEntry,
    destination: &Destination,
    success: &HandlerSuccess,
) {
    let now = Utc::now();

    if let Err(error) = ctx
        .queue
        .update_status(entry.id, EntryStatus::Completed, Some(now))
        .await
    {
        tracing::error!(
            entry_id = %entry.id,
            error = %error,
            "Failed to mark entry completed; stuck sweep will recover it"
        );
        return;
    }

    let attempt = DeliveryAttempt {
        attempt: entry.attempt_number(),
        started_at: success.delivered_at,
        duration_ms: success.response_time_ms,
        error: None,
        status_code: success.status_code,
    };
    record_attempt_metadata(ctx, entry, &attempt, success.cross_system_reference.as_deref()).await;

    ctx.health
        .record_success(destination.id, success.response_time_ms)
        .await;

    let log = DeliveryLogRecord::delivered(
        entry.payload.delivery_id,
        entry.organization.clone(),
        destination.id,
        entry.attempt_number(),
        success.cross_system_reference.clone(),
    );
    if let Err(error) = ctx.delivery_log.record(log).await {
        tracing::warn!(entry_id = %entry.id, error = %error, "Failed to write delivery log");
    }

    if let Some(metrics) = courier_metrics::metrics() {
        #[allow(clippy::cast_precision_loss)]
        metrics.delivery.record_attempt(
            entry.organization.as_str(),
            destination.kind.as_str(),
            true,
            success.response_time_ms as f64 / 1000.0,
        );
    }

    tracing::debug!(
        entry_id = %entry.id,
        delivery_id = %entry.payload.delivery_id,
        destination = %destination.id,
        attempt = entry.attempt_number(),
        "Entry delivered"
    );
}

async fn handle_failure(
    ctx: &WorkerContext,
    entry: &QueueEntry,
    destination: Option<&Destination>,
    error: &DeliveryError,
    elapsed_ms: u64,
) {
    let attempt = DeliveryAttempt {
        attempt: entry.attempt_number(),
        started_at: Utc::now(),
        duration_ms: elapsed_ms,
        error: Some(error.to_string()),
        status_code: match error {
            DeliveryError::Http { status, .. } => Some(*status),
            _ => None,
        },
    };
    record_attempt_metadata(ctx, entry, &attempt, None).await;

    // Circuit refusals never reached the destination and fatal errors are
    // internal; neither counts against destination health
    if error.counts_for_health()
        && let Some(destination) = destination
    {
        let transition = ctx
            .health
            .record_failure(destination.id, &entry.organization, &error.to_string())
            .await;
        if let (Some(state), Some(metrics)) = (transition, courier_metrics::metrics()) {
            metrics
                .circuit
                .record_transition(&destination.id.to_string(), state.as_str());
        }
    }

    if error.kind() == ErrorKind::Fatal {
        tracing::error!(
            entry_id = %entry.id,
            error = %error,
            "Fatal error while processing entry"
        );
    }

    let retryable = error.is_retryable() && entry.retries_remaining();
    if retryable {
        // Circuit refusals wait out the recovery timeout; everything else
        // follows the exponential policy. Backoff is data in the row, not a
        // held timer, so the slot frees immediately.
        let next_retry_at = if matches!(error, DeliveryError::CircuitOpen) {
            Utc::now() + ctx.health.recovery_timeout()
        } else {
            ctx.retry.next_retry_at(entry.attempt_number())
        };

        if let Err(store_error) = ctx
            .queue
            .schedule_retry(entry.id, next_retry_at, entry.retry_count + 1)
            .await
        {
            tracing::error!(
                entry_id = %entry.id,
                error = %store_error,
                "Failed to schedule retry; stuck sweep will recover the entry"
            );
            return;
        }

        if let Some(destination) = destination {
            let log = DeliveryLogRecord::retrying(
                entry.payload.delivery_id,
                entry.organization.clone(),
                destination.id,
                entry.attempt_number(),
                error.to_string(),
            );
            if let Err(log_error) = ctx.delivery_log.record(log).await {
                tracing::warn!(entry_id = %entry.id, error = %log_error, "Failed to write delivery log");
            }
        }

        if let Some(metrics) = courier_metrics::metrics() {
            let kind = destination.map_or("unknown", |d| d.kind.as_str());
            metrics
                .delivery
                .record_retry(kind, u64::from(entry.attempt_number()));
        }

        tracing::info!(
            entry_id = %entry.id,
            delivery_id = %entry.payload.delivery_id,
            attempt = entry.attempt_number(),
            next_retry_at = %next_retry_at,
            error = %error,
            "Entry scheduled for retry"
        );
    } else {
        fail_terminal(ctx, entry, error).await;
    }
}

/// Mark an entry failed and write its terminal log record
async fn fail_terminal(ctx: &WorkerContext, entry: &QueueEntry, error: &DeliveryError) {
    let now = Utc::now();
    if let Err(store_error) = ctx
        .queue
        .update_status(entry.id, EntryStatus::Failed, Some(now))
        .await
    {
        tracing::error!(
            entry_id = %entry.id,
            error = %store_error,
            "Failed to mark entry failed; stuck sweep will recover it"
        );
        return;
    }

    let log = DeliveryLogRecord::failed(
        entry.payload.delivery_id,
        entry.organization.clone(),
        entry.destination_id,
        entry.attempt_number(),
        error.to_string(),
    );
    if let Err(log_error) = ctx.delivery_log.record(log).await {
        tracing::warn!(entry_id = %entry.id, error = %log_error, "Failed to write delivery log");
    }

    if let Some(metrics) = courier_metrics::metrics() {
        metrics
            .delivery
            .record_attempt(entry.organization.as_str(), "unknown", false, 0.0);
    }

    tracing::warn!(
        entry_id = %entry.id,
        delivery_id = %entry.payload.delivery_id,
        attempts = entry.attempt_number(),
        error = %error,
        "Entry failed terminally"
    );
}

/// Merge an attempt record (and optional cross-system reference) into the
/// entry's metadata
async fn record_attempt_metadata(
    ctx: &WorkerContext,
    entry: &QueueEntry,
    attempt: &DeliveryAttempt,
    cross_system_reference: Option<&str>,
) {
    let mut updated = entry.clone();
    updated.record_attempt(attempt);

    let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
    if let Some(history) = updated.metadata.get("attempts") {
        metadata.insert("attempts".to_string(), history.clone());
    }
    if let Some(last_error) = updated.metadata.get("last_error") {
        metadata.insert("last_error".to_string(), last_error.clone());
    }
    if let Some(reference) = cross_system_reference {
        metadata.insert(
            "cross_system_reference".to_string(),
            serde_json::Value::String(reference.to_string()),
        );
    }

    if let Err(error) = ctx.queue.merge_metadata(entry.id, metadata).await {
        tracing::warn!(entry_id = %entry.id, error = %error, "Failed to record attempt metadata");
    }
}
