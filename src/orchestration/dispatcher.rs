//! # Dispatcher
//!
//! The single coordination loop. Each round claims the best eligible envelope,
//! resolves its routes on first dispatch, attempts every outstanding route
//! concurrently, logs one sync entry per attempt in route order, then either
//! finishes the envelope or hands the still-owed routes back to the queue.
//!
//! Per-attempt failures never escape a round. Only a corrupted state machine
//! (`BusError::is_fatal`) stops the loop.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::{PriorityEventQueue, RequeueOutcome};
use super::tracker::EnvelopeTracker;
use crate::audit::SyncLog;
use crate::delivery::{DeliveryClient, DeliveryRequest};
use crate::error::{BusError, DeliveryError, Result};
use crate::events::{BusEvent, EventPublisher};
use crate::logging::{log_delivery_attempt, log_envelope_operation};
use crate::models::{
    AbandonmentRecord, EnvelopeId, EventEnvelope, FailureKind, RouteTarget, Severity,
    SyncLogEntry, TargetOutcome, TargetStatus,
};
use crate::registry::{ModuleRegistry, RuleCatalog, TransformRegistry};
use crate::state_machine::{DeliveryState, EnvelopeEvent, EnvelopeStateMachine};
use crate::storage::BusStore;

/// Shared handles the dispatcher, health monitor and facade all work through
#[derive(Clone)]
pub struct BusComponents {
    pub registry: Arc<ModuleRegistry>,
    pub catalog: Arc<RuleCatalog>,
    pub transforms: Arc<TransformRegistry>,
    pub delivery: Arc<dyn DeliveryClient>,
    pub queue: Arc<PriorityEventQueue>,
    pub sync_log: Arc<SyncLog>,
    pub store: Arc<dyn BusStore>,
    pub tracker: Arc<EnvelopeTracker>,
    pub events: EventPublisher,
    pub stats: Arc<DispatcherStats>,
}

impl std::fmt::Debug for BusComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusComponents")
            .field("registry", &self.registry)
            .field("catalog", &self.catalog)
            .field("queue_len", &self.queue.len())
            .field("store", &self.store.backend_name())
            .finish()
    }
}

/// Running counters, readable while the dispatcher runs
#[derive(Debug, Default)]
pub struct DispatcherStats {
    rounds: AtomicU64,
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retries_scheduled: AtomicU64,
    delivered: AtomicU64,
    partial: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub rounds: u64,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries_scheduled: u64,
    pub delivered: u64,
    pub partial: u64,
    pub abandoned: u64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            rounds: self.rounds.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }

    fn record_terminal(&self, state: DeliveryState) {
        let counter = match state {
            DeliveryState::Delivered => &self.delivered,
            DeliveryState::Partial => &self.partial,
            DeliveryState::Abandoned => &self.abandoned,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// What the round should do with a route after its attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Delivered,
    /// Failed; try again next round
    Retry,
    /// Failed deterministically; retrying cannot help
    Permanent,
}

#[derive(Debug)]
struct RouteAttempt {
    entry: SyncLogEntry,
    disposition: Disposition,
}

#[derive(Debug)]
pub struct Dispatcher {
    components: BusComponents,
    delivery_timeout: Duration,
}

impl Dispatcher {
    pub fn new(components: BusComponents, delivery_timeout: Duration) -> Self {
        Self {
            components,
            delivery_timeout,
        }
    }

    /// Run until the queue is closed or a fatal error occurs
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(
            delivery_timeout_ms = self.delivery_timeout.as_millis() as u64,
            "🚀 DISPATCHER: Started"
        );
        while let Some(envelope) = self.components.queue.dequeue_next().await? {
            let id = envelope.id;
            if let Err(e) = self.process_envelope(envelope).await {
                if e.is_fatal() {
                    error!(error = %e, "❌ DISPATCHER: Fatal error, stopping");
                    return Err(e);
                }
                error!(envelope_id = %id, error = %e, "Dispatch round failed");
                if let Err(recovery) = self.recover_round(id, &e).await {
                    if recovery.is_fatal() {
                        error!(error = %recovery, "❌ DISPATCHER: Fatal error, stopping");
                        return Err(recovery);
                    }
                    error!(envelope_id = %id, error = %recovery, "Could not recover failed round");
                }
            }
        }
        info!("🛑 DISPATCHER: Queue closed, stopped");
        Ok(())
    }

    /// Wait for the next eligible envelope and run one round on it
    pub async fn dispatch_next(&self) -> Result<Option<(EnvelopeId, DeliveryState)>> {
        match self.components.queue.dequeue_next().await? {
            Some(envelope) => {
                let id = envelope.id;
                Ok(Some((id, self.process_envelope(envelope).await?)))
            }
            None => Ok(None),
        }
    }

    /// Run one round on an eligible envelope, if any, without waiting
    pub async fn dispatch_once(&self) -> Result<Option<(EnvelopeId, DeliveryState)>> {
        match self.components.queue.try_dequeue()? {
            Some(envelope) => {
                let id = envelope.id;
                Ok(Some((id, self.process_envelope(envelope).await?)))
            }
            None => Ok(None),
        }
    }

    /// Run one round on a claimed (processing) envelope
    pub async fn process_envelope(&self, mut envelope: EventEnvelope) -> Result<DeliveryState> {
        let c = &self.components;
        c.stats.rounds.fetch_add(1, Ordering::Relaxed);

        // Routes are resolved once; retries only revisit what is still owed
        if envelope.routes.is_none() {
            let routes = c.catalog.resolve(&envelope.source_id, &envelope.event_type);
            envelope.pending_routes = routes.clone();
            envelope.routes = Some(routes);
        }
        self.record(&envelope).await;

        if envelope.routes.as_ref().is_some_and(|routes| routes.is_empty()) {
            debug!(envelope_id = %envelope.id, "No matching rules, consuming envelope");
            EnvelopeStateMachine::transition(&mut envelope, &EnvelopeEvent::Deliver)?;
            return self.finish(envelope).await;
        }

        let attempt = envelope.attempt_number();
        let round: Vec<RouteTarget> = envelope.pending_routes.clone();
        let attempts = join_all(
            round
                .iter()
                .map(|route| self.attempt_route(&envelope, route, attempt)),
        )
        .await;

        let mut still_owed = Vec::new();
        for (route, result) in round.into_iter().zip(attempts) {
            self.log_attempt(&result);
            if let Err(e) = c.sync_log.append(result.entry.clone()).await {
                error!(
                    envelope_id = %envelope.id,
                    error = %e,
                    "Sync log entry not persisted yet; kept in memory for a later flush"
                );
            }

            let outcome = match result.disposition {
                Disposition::Delivered => TargetOutcome::delivered(&route, attempt),
                Disposition::Retry | Disposition::Permanent => TargetOutcome::failed(
                    &route,
                    attempt,
                    result.entry.error.clone().unwrap_or_default(),
                ),
            };
            envelope.record_outcome(outcome);
            if result.disposition == Disposition::Retry {
                still_owed.push(route);
            }
        }
        envelope.pending_routes = still_owed;

        if envelope.pending_routes.is_empty() {
            if Self::failed_targets(&envelope).is_empty() {
                EnvelopeStateMachine::transition(&mut envelope, &EnvelopeEvent::Deliver)?;
                return self.finish(envelope).await;
            }
            return self
                .finish_incomplete(envelope, "targets failed with non-retryable errors")
                .await;
        }

        match c.queue.requeue(&mut envelope) {
            Ok(RequeueOutcome::Scheduled(delay)) => {
                c.stats.retries_scheduled.fetch_add(1, Ordering::Relaxed);
                self.record(&envelope).await;
                log_envelope_operation(
                    "retry_scheduled",
                    envelope.id,
                    &envelope.source_id,
                    envelope.event_type.as_str(),
                    &envelope.state.to_string(),
                    Some(&format!(
                        "retry {}/{} in {}ms",
                        envelope.retry_count,
                        envelope.max_retries,
                        delay.as_millis()
                    )),
                );
                c.events.publish(BusEvent::EnvelopeRetryScheduled {
                    envelope_id: envelope.id,
                    retry_count: envelope.retry_count,
                    delay_ms: delay.as_millis() as u64,
                    pending_targets: envelope.undelivered_targets(),
                    at: Utc::now(),
                });
                Ok(envelope.state)
            }
            Ok(RequeueOutcome::CancelRequested) => {
                self.finish_incomplete(envelope, "cancelled while processing")
                    .await
            }
            Err(BusError::ExhaustedRetries { max_retries, .. }) => {
                let reason = format!("retry budget of {max_retries} exhausted");
                self.finish_incomplete(envelope, &reason).await
            }
            Err(e) => Err(e),
        }
    }

    /// Settle an envelope whose round ended in a non-fatal error.
    ///
    /// Starts from the copy recorded when the round began: the envelope is
    /// scheduled for another round if the queue still holds its claim and the
    /// retry budget allows, otherwise it is finished incomplete. Either way the
    /// claim is released.
    pub async fn recover_round(&self, id: EnvelopeId, cause: &BusError) -> Result<DeliveryState> {
        let c = &self.components;
        let Some(mut envelope) = c.tracker.get(&id) else {
            c.queue.complete(id);
            return Err(BusError::not_found("envelope", id.to_string()));
        };
        if envelope.is_terminal() {
            c.queue.complete(id);
            return Ok(envelope.state);
        }
        if envelope.state != DeliveryState::Processing {
            EnvelopeStateMachine::transition(&mut envelope, &EnvelopeEvent::Claim)?;
        }

        match c.queue.requeue(&mut envelope) {
            Ok(RequeueOutcome::Scheduled(delay)) => {
                c.stats.retries_scheduled.fetch_add(1, Ordering::Relaxed);
                warn!(
                    envelope_id = %id,
                    retry_count = envelope.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rescheduled envelope after a failed round"
                );
                self.record(&envelope).await;
                Ok(envelope.state)
            }
            _ => {
                self.finish_incomplete(envelope, &format!("dispatch round failed: {cause}"))
                    .await
            }
        }
    }

    /// Finalize an envelope removed from the queue by cancellation
    pub async fn finalize_cancelled(&self, envelope: EventEnvelope) -> Result<DeliveryState> {
        self.write_abandonment(&envelope, "cancelled while waiting").await;
        self.finish(envelope).await
    }

    async fn attempt_route(
        &self,
        envelope: &EventEnvelope,
        route: &RouteTarget,
        attempt: u32,
    ) -> RouteAttempt {
        let c = &self.components;
        let started = Instant::now();
        let failure = |kind: FailureKind, error: String, disposition: Disposition| RouteAttempt {
            entry: SyncLogEntry::failure(
                envelope.id,
                &envelope.source_id,
                &envelope.event_type,
                route,
                attempt,
                started.elapsed().as_millis() as u64,
                kind,
                error,
            ),
            disposition,
        };

        let target = match c.registry.get(&route.target_id) {
            Ok(target) => target,
            Err(_) => {
                return failure(
                    FailureKind::UnknownTarget,
                    format!("target module {} is not registered", route.target_id),
                    Disposition::Retry,
                )
            }
        };
        if !target.is_deliverable() {
            return failure(
                FailureKind::TargetOffline,
                format!("target module {} is {}", target.id, target.status),
                Disposition::Retry,
            );
        }

        let payload = match c.transforms.apply(&route.transform, &envelope.payload) {
            Ok(payload) => payload,
            Err(e) => return failure(FailureKind::Transform, e.to_string(), Disposition::Permanent),
        };

        let request = DeliveryRequest {
            envelope_id: envelope.id,
            source_id: envelope.source_id.clone(),
            event_type: envelope.event_type.clone(),
            rule_id: route.rule_id.clone(),
            payload,
        };

        match tokio::time::timeout(self.delivery_timeout, c.delivery.deliver(&target, &request))
            .await
        {
            Ok(Ok(_receipt)) => RouteAttempt {
                entry: SyncLogEntry::success(
                    envelope.id,
                    &envelope.source_id,
                    &envelope.event_type,
                    route,
                    attempt,
                    started.elapsed().as_millis() as u64,
                ),
                disposition: Disposition::Delivered,
            },
            Ok(Err(e @ DeliveryError::Timeout { .. })) => {
                failure(FailureKind::Timeout, e.to_string(), Disposition::Retry)
            }
            Ok(Err(e)) => failure(FailureKind::Delivery, e.to_string(), Disposition::Retry),
            Err(_) => {
                let e = DeliveryError::Timeout {
                    module_id: target.id.clone(),
                    timeout: self.delivery_timeout,
                };
                failure(FailureKind::Timeout, e.to_string(), Disposition::Retry)
            }
        }
    }

    fn log_attempt(&self, result: &RouteAttempt) {
        let stats = &self.components.stats;
        stats.attempts.fetch_add(1, Ordering::Relaxed);
        match result.disposition {
            Disposition::Delivered => stats.successes.fetch_add(1, Ordering::Relaxed),
            _ => stats.failures.fetch_add(1, Ordering::Relaxed),
        };

        let entry = &result.entry;
        log_delivery_attempt(
            entry.envelope_id,
            &entry.rule_id,
            &entry.target_id,
            entry.attempt,
            &entry.outcome.to_string(),
            entry.latency_ms,
            entry.error.as_deref(),
        );
    }

    fn failed_targets(envelope: &EventEnvelope) -> Vec<String> {
        envelope
            .outcomes
            .iter()
            .filter(|outcome| outcome.status == TargetStatus::Failed)
            .map(|outcome| outcome.target_id.clone())
            .collect()
    }

    /// End an envelope that still owes at least one target
    async fn finish_incomplete(
        &self,
        mut envelope: EventEnvelope,
        reason: &str,
    ) -> Result<DeliveryState> {
        let event = if envelope.any_delivered() {
            EnvelopeEvent::Partial(reason.to_string())
        } else {
            EnvelopeEvent::Abandon(reason.to_string())
        };
        EnvelopeStateMachine::transition(&mut envelope, &event)?;
        self.write_abandonment(&envelope, reason).await;
        self.finish(envelope).await
    }

    async fn write_abandonment(&self, envelope: &EventEnvelope, reason: &str) {
        let mut undelivered = Self::failed_targets(envelope);
        for target in envelope.undelivered_targets() {
            if !undelivered.contains(&target) {
                undelivered.push(target);
            }
        }

        let record = AbandonmentRecord {
            id: Uuid::new_v4(),
            envelope_id: envelope.id,
            source_id: envelope.source_id.clone(),
            event_type: envelope.event_type.clone(),
            undelivered_targets: undelivered,
            retry_count: envelope.retry_count,
            reason: reason.to_string(),
            severity: Severity::Critical,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.components.sync_log.record_abandonment(record).await {
            error!(
                envelope_id = %envelope.id,
                error = %e,
                "Abandonment record not persisted yet; kept in memory for a later flush"
            );
        }
    }

    /// Terminal bookkeeping shared by every ending
    async fn finish(&self, envelope: EventEnvelope) -> Result<DeliveryState> {
        let c = &self.components;
        let state = envelope.state;
        if !state.is_terminal() {
            return Err(BusError::Internal(format!(
                "envelope {} finished in non-terminal state {state}",
                envelope.id
            )));
        }

        c.queue.complete(envelope.id);
        self.record(&envelope).await;
        c.stats.record_terminal(state);

        let delivered = envelope
            .outcomes
            .iter()
            .filter(|outcome| outcome.status == TargetStatus::Delivered)
            .count();
        let undelivered = Self::failed_targets(&envelope);

        log_envelope_operation(
            "completed",
            envelope.id,
            &envelope.source_id,
            envelope.event_type.as_str(),
            &state.to_string(),
            Some(&format!(
                "delivered={delivered} undelivered={} attempts={}",
                undelivered.len(),
                envelope.attempt_number()
            )),
        );
        if state != DeliveryState::Delivered {
            warn!(
                envelope_id = %envelope.id,
                state = %state,
                undelivered = ?undelivered,
                "Envelope finished incomplete"
            );
        }

        c.events.publish(BusEvent::EnvelopeCompleted {
            envelope_id: envelope.id,
            state,
            delivered,
            undelivered,
            at: Utc::now(),
        });
        Ok(state)
    }

    /// Journal the envelope and refresh the tracker. Storage failures are logged;
    /// the in-memory copy stays authoritative for this process.
    async fn record(&self, envelope: &EventEnvelope) {
        let c = &self.components;
        if let Err(e) = c.store.journal_envelope(envelope).await {
            error!(envelope_id = %envelope.id, error = %e, "Failed to journal envelope");
        }
        c.tracker.track(envelope.clone());
    }
}
