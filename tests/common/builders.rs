//! Bus fixtures shared by the integration suites.

use async_trait::async_trait;
use integration_bus::config::{BusConfig, DeliveryMode};
use integration_bus::models::{
    AbandonmentRecord, EnvelopeId, EventEnvelope, EventType, IntegrationRule, Module,
    ModuleDescriptor, RuleTarget, SyncLogEntry,
};
use integration_bus::storage::{BusStore, MemoryStore};
use integration_bus::{BusError, IntegrationBus, Result, SandboxDeliveryClient};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Millisecond backoff, no background health probing, sandbox delivery
pub fn fast_config() -> BusConfig {
    let mut config = BusConfig::default();
    config.dispatcher.base_backoff_ms = 10;
    config.dispatcher.max_backoff_ms = 100;
    config.health.enabled = false;
    config.delivery.mode = DeliveryMode::Sandbox;
    config.delivery.timeout_ms = 1_000;
    config
}

pub struct TestBus {
    pub bus: IntegrationBus,
    pub sandbox: Arc<SandboxDeliveryClient>,
}

impl TestBus {
    pub async fn new() -> Self {
        Self::with_config(fast_config()).await
    }

    pub async fn with_config(config: BusConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new())).await
    }

    pub async fn with_store(config: BusConfig, store: Arc<dyn BusStore>) -> Self {
        let sandbox = Arc::new(SandboxDeliveryClient::new());
        let bus = IntegrationBus::bootstrap_with(config, store, sandbox.clone())
            .await
            .expect("bus should bootstrap");
        Self { bus, sandbox }
    }

    /// Point of sale, kitchen and finance, all registered
    pub async fn with_restaurant_modules() -> Self {
        let test_bus = Self::new().await;
        test_bus.register_restaurant_modules().await;
        test_bus
    }

    pub async fn register_restaurant_modules(&self) {
        for descriptor in [pos(), kitchen(), finance()] {
            self.bus
                .register_module(descriptor)
                .await
                .expect("module should register");
        }
    }

    /// Drive dispatch rounds by hand until the envelope is terminal
    pub async fn drive_to_terminal(&self, envelope_id: EnvelopeId) -> EventEnvelope {
        for _ in 0..16 {
            if let Some(envelope) = self.bus.envelope(envelope_id) {
                if envelope.is_terminal() {
                    return envelope;
                }
            }
            tokio::time::timeout(Duration::from_secs(2), self.bus.dispatcher().dispatch_next())
                .await
                .expect("dispatch round should not stall")
                .expect("dispatch round should succeed");
        }
        panic!("envelope {envelope_id} did not reach a terminal state");
    }
}

pub fn pos() -> ModuleDescriptor {
    ModuleDescriptor::new("pos", "Point of Sale", "sandbox://pos")
        .emits([EventType::SaleCompleted, EventType::OrderCreated])
}

pub fn kitchen() -> ModuleDescriptor {
    ModuleDescriptor::new("kitchen", "Kitchen Display", "sandbox://kitchen")
        .accepts([EventType::SaleCompleted])
}

pub fn finance() -> ModuleDescriptor {
    ModuleDescriptor::new("finance", "Finance", "sandbox://finance")
        .accepts([EventType::SaleCompleted, EventType::OrderCreated])
}

pub fn sale_to_kitchen_rule() -> IntegrationRule {
    IntegrationRule::new(
        "pos-sale-to-kitchen",
        "pos",
        [EventType::SaleCompleted],
        [RuleTarget::new("kitchen", "sale_to_kitchen_ticket")],
    )
}

pub fn sale_fanout_rule() -> IntegrationRule {
    IntegrationRule::new(
        "pos-sale-fanout",
        "pos",
        [EventType::SaleCompleted],
        [
            RuleTarget::new("kitchen", "sale_to_kitchen_ticket"),
            RuleTarget::new("finance", "identity"),
        ],
    )
}

pub fn sale_payload(sale_id: &str) -> Value {
    json!({
        "sale_id": sale_id,
        "table": 12,
        "total": 42.5,
        "items": [
            {"name": "Margherita", "quantity": 2},
            {"name": "Tiramisu"}
        ]
    })
}

/// Memory store whose audit appends can be switched to fail
#[derive(Default)]
pub struct FlakyAuditStore {
    inner: MemoryStore,
    reject_audit_writes: AtomicBool,
}

impl FlakyAuditStore {
    pub fn rejecting() -> Self {
        let store = Self::default();
        store.set_rejecting(true);
        store
    }

    pub fn set_rejecting(&self, rejecting: bool) {
        self.reject_audit_writes.store(rejecting, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.reject_audit_writes.load(Ordering::SeqCst) {
            return Err(BusError::StorageError("audit table unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BusStore for FlakyAuditStore {
    fn backend_name(&self) -> &'static str {
        "flaky-memory"
    }

    async fn save_module(&self, module: &Module) -> Result<()> {
        self.inner.save_module(module).await
    }

    async fn load_modules(&self) -> Result<Vec<Module>> {
        self.inner.load_modules().await
    }

    async fn save_rule(&self, rule: &IntegrationRule) -> Result<()> {
        self.inner.save_rule(rule).await
    }

    async fn load_rules(&self) -> Result<Vec<IntegrationRule>> {
        self.inner.load_rules().await
    }

    async fn append_sync_entry(&self, entry: &SyncLogEntry) -> Result<()> {
        self.check()?;
        self.inner.append_sync_entry(entry).await
    }

    async fn load_sync_entries(&self) -> Result<Vec<SyncLogEntry>> {
        self.inner.load_sync_entries().await
    }

    async fn append_abandonment(&self, record: &AbandonmentRecord) -> Result<()> {
        self.check()?;
        self.inner.append_abandonment(record).await
    }

    async fn load_abandonments(&self) -> Result<Vec<AbandonmentRecord>> {
        self.inner.load_abandonments().await
    }

    async fn journal_envelope(&self, envelope: &EventEnvelope) -> Result<()> {
        self.inner.journal_envelope(envelope).await
    }

    async fn load_unfinished_envelopes(&self) -> Result<Vec<EventEnvelope>> {
        self.inner.load_unfinished_envelopes().await
    }
}
