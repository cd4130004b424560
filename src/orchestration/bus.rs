//! # Integration Bus
//!
//! Facade that wires storage, registries, queue, dispatcher and health monitor
//! together and exposes the operations modules and operators call.
//!
//! ```rust,no_run
//! use integration_bus::config::BusConfig;
//! use integration_bus::models::{EventType, ModuleDescriptor, Priority};
//! use integration_bus::IntegrationBus;
//! use serde_json::json;
//!
//! # async fn example() -> integration_bus::Result<()> {
//! let bus = IntegrationBus::bootstrap(BusConfig::default()).await?;
//! bus.register_module(ModuleDescriptor::new("pos", "Point of Sale", "http://pos:8080"))
//!     .await?;
//!
//! let handle = bus.start();
//! let envelope_id = bus
//!     .publish("pos", EventType::SaleCompleted, json!({"total": 12.5}), Priority::High)
//!     .await?;
//! # let _ = envelope_id;
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::dispatcher::{BusComponents, Dispatcher, DispatcherStats, DispatcherStatsSnapshot};
use super::health_monitor::HealthMonitor;
use super::queue::{PriorityEventQueue, QueueCancel};
use super::tracker::EnvelopeTracker;
use crate::audit::SyncLog;
use crate::config::BusConfig;
use crate::constants::SHUTDOWN_GRACE_PERIOD;
use crate::delivery::{create_delivery_client, DeliveryClient};
use crate::error::{BusError, Result, TransformError};
use crate::events::{BusEvent, EventPublisher};
use crate::logging::log_envelope_operation;
use crate::models::{
    AbandonmentRecord, AuditQuery, EnvelopeId, EventEnvelope, EventType, IntegrationRule, Module,
    ModuleDescriptor, Priority, SyncLogEntry,
};
use crate::registry::{HealthPolicy, ModuleRegistry, PayloadTransform, RuleCatalog, TransformRegistry};
use crate::state_machine::DeliveryState;
use crate::storage::{create_store, BusStore};

/// Result of `IntegrationBus::cancel`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed from the queue and finalized in `state`
    Cancelled { state: DeliveryState },
    /// Mid-round; the envelope finishes this round and is not retried
    RetriesSuppressed,
    AlreadyTerminal { state: DeliveryState },
}

#[derive(Debug)]
pub struct IntegrationBus {
    config: BusConfig,
    components: BusComponents,
    dispatcher: Arc<Dispatcher>,
    health_monitor: Arc<HealthMonitor>,
}

impl IntegrationBus {
    /// Build a bus from configuration: storage and delivery client are chosen by
    /// their config sections.
    pub async fn bootstrap(config: BusConfig) -> Result<Self> {
        config.validate()?;
        let store = create_store(&config.storage).await?;
        let delivery = create_delivery_client(&config.delivery)?;
        Self::bootstrap_with(config, store, delivery).await
    }

    /// Build a bus around an existing store and delivery client
    pub async fn bootstrap_with(
        config: BusConfig,
        store: Arc<dyn BusStore>,
        delivery: Arc<dyn DeliveryClient>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            backend = store.backend_name(),
            modules = config.modules.len(),
            rules = config.rules.len(),
            "🔧 BUS: Bootstrapping"
        );

        let registry = Arc::new(ModuleRegistry::new(
            HealthPolicy::from(&config.health),
            store.clone(),
        ));
        let catalog = Arc::new(RuleCatalog::new(store.clone()));
        let transforms = Arc::new(TransformRegistry::with_builtins());
        let sync_log = Arc::new(SyncLog::new(store.clone()));

        let restored_modules = registry.restore().await?;
        let restored_rules = catalog.restore().await?;
        let restored_entries = sync_log.restore().await?;
        debug!(
            modules = restored_modules,
            rules = restored_rules,
            sync_entries = restored_entries,
            "Restored persisted state"
        );

        for definition in &config.transforms {
            transforms.register_definition(definition)?;
        }
        for descriptor in &config.modules {
            registry.register(descriptor.clone()).await?;
        }

        let components = BusComponents {
            registry,
            catalog,
            transforms,
            delivery: delivery.clone(),
            queue: Arc::new(PriorityEventQueue::new(BackoffPolicy::from(&config.dispatcher))),
            sync_log,
            store,
            tracker: Arc::new(EnvelopeTracker::new(config.dispatcher.completed_retention)),
            events: EventPublisher::new(config.events.channel_capacity),
            stats: Arc::new(DispatcherStats::default()),
        };

        let dispatcher = Arc::new(Dispatcher::new(components.clone(), config.delivery.timeout()));
        let health_monitor = Arc::new(HealthMonitor::new(
            components.registry.clone(),
            delivery,
            components.events.clone(),
            &config.health,
        ));

        let bus = Self {
            config,
            components,
            dispatcher,
            health_monitor,
        };

        for rule in bus.config.rules.clone() {
            bus.check_transforms(&rule)?;
            bus.components.catalog.upsert_rule(rule).await?;
        }
        bus.recover_envelopes().await?;

        info!("✅ BUS: Ready");
        Ok(bus)
    }

    /// Re-enqueue journaled envelopes that had not reached a terminal state
    async fn recover_envelopes(&self) -> Result<usize> {
        let c = &self.components;
        let envelopes = c.store.load_unfinished_envelopes().await?;
        let mut recovered = 0;
        for mut envelope in envelopes {
            envelope.reset_for_recovery();
            c.store.journal_envelope(&envelope).await?;
            let id = envelope.id;
            c.tracker.track(envelope.clone());
            match c.queue.enqueue(envelope) {
                Ok(()) => recovered += 1,
                Err(e) => {
                    c.tracker.forget(&id);
                    warn!(envelope_id = %id, error = %e, "Skipping unrecoverable envelope");
                }
            }
        }
        if recovered > 0 {
            info!(recovered = recovered, "Recovered unfinished envelopes");
        }
        Ok(recovered)
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn components(&self) -> &BusComponents {
        &self.components
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health_monitor
    }

    // ---- Modules ----

    pub async fn register_module(&self, descriptor: ModuleDescriptor) -> Result<Module> {
        self.components.registry.register(descriptor).await
    }

    pub async fn deactivate_module(&self, module_id: &str) -> Result<Module> {
        self.components.registry.deactivate(module_id).await
    }

    pub fn module(&self, module_id: &str) -> Result<Module> {
        self.components.registry.get(module_id)
    }

    pub fn modules(&self) -> Vec<Module> {
        self.components.registry.list()
    }

    pub fn active_modules(&self) -> Vec<Module> {
        self.components.registry.list_active()
    }

    // ---- Rules and transforms ----

    fn check_transforms(&self, rule: &IntegrationRule) -> Result<()> {
        for target in &rule.targets {
            if !self.components.transforms.contains(&target.transform) {
                return Err(TransformError::UnknownTransform(target.transform.clone()).into());
            }
            match self.components.registry.get(&target.target_id) {
                Ok(module) if !rule.event_types.iter().all(|et| module.accepts(et)) => warn!(
                    rule_id = %rule.id,
                    target_id = %target.target_id,
                    "Rule target does not declare the routed event type"
                ),
                Ok(_) => {}
                Err(_) => warn!(
                    rule_id = %rule.id,
                    target_id = %target.target_id,
                    "Rule targets a module that is not registered yet"
                ),
            }
        }
        Ok(())
    }

    pub async fn add_rule(&self, rule: IntegrationRule) -> Result<IntegrationRule> {
        rule.validate()?;
        self.check_transforms(&rule)?;
        self.components.catalog.add_rule(rule).await
    }

    /// Replace a rule. Envelopes already past first dispatch keep their routes.
    pub async fn update_rule(&self, rule: IntegrationRule) -> Result<IntegrationRule> {
        rule.validate()?;
        self.check_transforms(&rule)?;
        self.components.catalog.get(&rule.id)?;
        self.components.catalog.upsert_rule(rule).await
    }

    pub async fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> Result<IntegrationRule> {
        self.components.catalog.set_enabled(rule_id, enabled).await
    }

    pub fn rules(&self) -> Vec<IntegrationRule> {
        self.components.catalog.list()
    }

    pub fn register_transform(&self, transform: Arc<dyn PayloadTransform>) {
        self.components.transforms.register(transform);
    }

    // ---- Ingress ----

    /// Accept an event for asynchronous dispatch.
    ///
    /// Succeeds regardless of target availability. The envelope is journaled and
    /// enqueued before the id is returned.
    pub async fn publish(
        &self,
        source_id: &str,
        event_type: EventType,
        payload: Value,
        priority: Priority,
    ) -> Result<EnvelopeId> {
        let c = &self.components;
        if c.queue.is_closed() {
            return Err(BusError::ValidationError("bus is shut down".to_string()));
        }
        if event_type.is_empty() {
            return Err(BusError::ValidationError("event type must not be empty".to_string()));
        }
        match c.registry.get(source_id) {
            Ok(module) if module.enabled => {}
            _ => return Err(BusError::UnknownModule(source_id.to_string())),
        }

        let size = serde_json::to_vec(&payload)
            .map_err(|e| BusError::ValidationError(format!("payload is not serializable: {e}")))?
            .len();
        if size > self.config.ingress.max_payload_bytes {
            return Err(BusError::ValidationError(format!(
                "payload of {size} bytes exceeds limit of {} bytes",
                self.config.ingress.max_payload_bytes
            )));
        }

        let envelope = EventEnvelope::new(
            source_id,
            event_type,
            payload,
            priority,
            self.config.dispatcher.max_retries,
        );
        let id = envelope.id;

        c.store.journal_envelope(&envelope).await?;
        // Tracked before it is claimable, so the dispatcher's copy is always newer
        c.tracker.track(envelope.clone());
        if let Err(e) = c.queue.enqueue(envelope.clone()) {
            c.tracker.forget(&id);
            return Err(e);
        }

        log_envelope_operation(
            "published",
            id,
            &envelope.source_id,
            envelope.event_type.as_str(),
            &envelope.state.to_string(),
            Some(&format!("priority={}", envelope.priority)),
        );
        c.events.publish(BusEvent::EnvelopeAccepted {
            envelope_id: id,
            source_id: envelope.source_id,
            event_type: envelope.event_type,
            priority: envelope.priority,
            at: Utc::now(),
        });
        Ok(id)
    }

    /// Stop an envelope from being (re)tried
    pub async fn cancel(&self, envelope_id: EnvelopeId) -> Result<CancelOutcome> {
        match self.components.queue.cancel(envelope_id)? {
            QueueCancel::Removed(envelope) => {
                let state = self.dispatcher.finalize_cancelled(envelope).await?;
                Ok(CancelOutcome::Cancelled { state })
            }
            QueueCancel::InFlight => Ok(CancelOutcome::RetriesSuppressed),
            QueueCancel::NotQueued => match self.envelope(envelope_id) {
                Some(envelope) if envelope.is_terminal() => Ok(CancelOutcome::AlreadyTerminal {
                    state: envelope.state,
                }),
                Some(_) => Err(BusError::ValidationError(format!(
                    "envelope {envelope_id} is not cancellable in its current state"
                ))),
                None => match self.components.sync_log.terminal_state_for(envelope_id) {
                    Some(state) => Ok(CancelOutcome::AlreadyTerminal { state }),
                    None => Err(BusError::not_found("envelope", envelope_id.to_string())),
                },
            },
        }
    }

    // ---- Inspection ----

    /// Latest copy of a live or recently finished envelope
    pub fn envelope(&self, envelope_id: EnvelopeId) -> Option<EventEnvelope> {
        self.components.tracker.get(&envelope_id)
    }

    /// Final state of a finished envelope, falling back to the sync log once the
    /// tracker has evicted it
    pub fn terminal_state(&self, envelope_id: EnvelopeId) -> Option<DeliveryState> {
        match self.envelope(envelope_id) {
            Some(envelope) if envelope.is_terminal() => Some(envelope.state),
            Some(_) => None,
            None => self.components.sync_log.terminal_state_for(envelope_id),
        }
    }

    /// Wait until the envelope reaches a terminal state, or `timeout` elapses
    pub async fn wait_for_terminal(
        &self,
        envelope_id: EnvelopeId,
        timeout: Duration,
    ) -> Option<EventEnvelope> {
        let mut events = self.subscribe();
        let is_done = || self.envelope(envelope_id).filter(EventEnvelope::is_terminal);
        if let Some(envelope) = is_done() {
            return Some(envelope);
        }

        let waited = tokio::time::timeout(timeout, async {
            loop {
                match events.recv().await {
                    Ok(BusEvent::EnvelopeCompleted { envelope_id: id, .. }) if id == envelope_id => {
                        break
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if is_done().is_some() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
        .await;

        match waited {
            Ok(()) => is_done(),
            Err(_) => None,
        }
    }

    pub fn sync_log(&self) -> &Arc<SyncLog> {
        &self.components.sync_log
    }

    pub fn audit(&self, query: &AuditQuery) -> Vec<SyncLogEntry> {
        self.components.sync_log.query(query)
    }

    pub fn abandonments(&self) -> Vec<AbandonmentRecord> {
        self.components.sync_log.abandonments()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.components.events.subscribe()
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.components.stats.snapshot()
    }

    pub fn queue_len(&self) -> usize {
        self.components.queue.len()
    }

    // ---- Lifecycle ----

    /// Spawn the dispatcher and (if enabled) the health monitor
    pub fn start(&self) -> BusHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = tokio::spawn(self.dispatcher.clone().run());
        let health = self
            .config
            .health
            .enabled
            .then(|| tokio::spawn(self.health_monitor.clone().run(shutdown_rx)));

        info!(health_monitor = health.is_some(), "🚀 BUS: Started");
        BusHandle {
            queue: self.components.queue.clone(),
            shutdown_tx,
            dispatcher,
            health,
        }
    }
}

/// Running background loops of a started bus
#[derive(Debug)]
pub struct BusHandle {
    queue: Arc<PriorityEventQueue>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: JoinHandle<Result<()>>,
    health: Option<JoinHandle<()>>,
}

impl BusHandle {
    /// Whether the dispatcher loop has exited (closed queue or fatal error)
    pub fn is_finished(&self) -> bool {
        self.dispatcher.is_finished()
    }

    /// Close the queue, stop the health monitor and wait for both loops.
    /// Envelopes still waiting stay journaled for the next start.
    pub async fn shutdown(self) -> Result<()> {
        info!("🛑 BUS: Shutting down");
        self.queue.close();
        let _ = self.shutdown_tx.send(true);

        if let Some(health) = self.health {
            if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, health).await.is_err() {
                warn!("Health monitor did not stop within the grace period");
            }
        }

        match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, self.dispatcher).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                error!(error = %join_error, "Dispatcher task panicked");
                Err(BusError::Internal(format!("dispatcher task failed: {join_error}")))
            }
            Err(_) => {
                warn!("Dispatcher did not stop within the grace period");
                Ok(())
            }
        }
    }
}
