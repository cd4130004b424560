//! # Module Registry
//!
//! Read-mostly table of registered modules. Reads take a shared lock and return
//! owned snapshots; writers are serialized through a write gate so the persisted
//! copy never lags behind an older in-memory state.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::error::{BusError, Result};
use crate::logging::log_registry_operation;
use crate::models::{HealthSnapshot, Module, ModuleDescriptor, ModuleId, ModuleStatus, ProbeResult};
use crate::storage::BusStore;

/// Thresholds applied by `mark_health`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    pub failure_threshold: u32,
    pub smoothing_factor: f64,
    pub history_size: usize,
}

impl From<&HealthConfig> for HealthPolicy {
    fn from(config: &HealthConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            smoothing_factor: config.smoothing_factor,
            history_size: config.history_size,
        }
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

/// Result of applying one probe to a module
#[derive(Debug, Clone, PartialEq)]
pub struct HealthUpdate {
    pub snapshot: HealthSnapshot,
    pub previous_status: ModuleStatus,
}

impl HealthUpdate {
    pub fn status_changed(&self) -> bool {
        self.previous_status != self.snapshot.status
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    modules: HashMap<ModuleId, Module>,
    /// Registration order
    order: Vec<ModuleId>,
}

pub struct ModuleRegistry {
    state: RwLock<RegistryState>,
    write_gate: Mutex<()>,
    policy: HealthPolicy,
    store: Arc<dyn BusStore>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.state.read().order.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new(policy: HealthPolicy, store: Arc<dyn BusStore>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            write_gate: Mutex::new(()),
            policy,
            store,
        }
    }

    /// Load modules from the store into memory
    pub async fn restore(&self) -> Result<usize> {
        let _gate = self.write_gate.lock().await;
        let mut modules = self.store.load_modules().await?;
        modules.sort_by_key(|module| module.registered_at);

        let mut state = self.state.write();
        for module in modules {
            if !state.modules.contains_key(&module.id) {
                state.order.push(module.id.clone());
            }
            state.modules.insert(module.id.clone(), module);
        }
        Ok(state.order.len())
    }

    /// Register a module, or update address/capabilities of a known one
    pub async fn register(&self, descriptor: ModuleDescriptor) -> Result<Module> {
        descriptor.validate()?;
        let _gate = self.write_gate.lock().await;

        let (module, existed) = {
            let mut state = self.state.write();
            match state.modules.get_mut(&descriptor.module_id) {
                Some(existing) => {
                    existing.apply_descriptor(descriptor);
                    (existing.clone(), true)
                }
                None => {
                    let module = Module::from_descriptor(descriptor);
                    state.order.push(module.id.clone());
                    state.modules.insert(module.id.clone(), module.clone());
                    (module, false)
                }
            }
        };

        self.store.save_module(&module).await?;
        log_registry_operation(
            if existed { "reregister" } else { "register" },
            &module.id,
            &module.status.to_string(),
            Some(&module.address),
        );
        Ok(module)
    }

    pub fn get(&self, id: &str) -> Result<Module> {
        self.state
            .read()
            .modules
            .get(id)
            .cloned()
            .ok_or_else(|| BusError::not_found("module", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().modules.contains_key(id)
    }

    /// Modules whose status is not offline, in registration order
    pub fn list_active(&self) -> Vec<Module> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.modules.get(id))
            .filter(|module| module.enabled && module.status != ModuleStatus::Offline)
            .cloned()
            .collect()
    }

    /// All modules in registration order
    pub fn list(&self) -> Vec<Module> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.modules.get(id))
            .cloned()
            .collect()
    }

    /// Enabled modules the health monitor should probe
    pub fn probe_candidates(&self) -> Vec<Module> {
        self.list()
            .into_iter()
            .filter(|module| module.enabled)
            .collect()
    }

    /// Take a module out of service without forgetting it
    pub async fn deactivate(&self, id: &str) -> Result<Module> {
        let _gate = self.write_gate.lock().await;
        let module = {
            let mut state = self.state.write();
            let module = state
                .modules
                .get_mut(id)
                .ok_or_else(|| BusError::not_found("module", id))?;
            module.enabled = false;
            module.status = ModuleStatus::Offline;
            module.updated_at = Utc::now();
            module.clone()
        };

        self.store.save_module(&module).await?;
        log_registry_operation("deactivate", id, "offline", None);
        Ok(module)
    }

    /// Fold a probe result into the module's rolling health
    pub async fn mark_health(&self, id: &str, probe: ProbeResult) -> Result<HealthUpdate> {
        let _gate = self.write_gate.lock().await;
        let (module, update) = {
            let mut state = self.state.write();
            let module = state
                .modules
                .get_mut(id)
                .ok_or_else(|| BusError::not_found("module", id))?;
            let update = Self::apply_probe(module, probe, &self.policy);
            (module.clone(), update)
        };

        if update.status_changed() {
            if update.snapshot.status == ModuleStatus::Offline {
                warn!(
                    module_id = %id,
                    consecutive_failures = module.consecutive_failures,
                    score = update.snapshot.score,
                    "Module went offline"
                );
            } else {
                info!(
                    module_id = %id,
                    from = %update.previous_status,
                    to = %update.snapshot.status,
                    score = update.snapshot.score,
                    "Module status changed"
                );
            }
        } else {
            debug!(
                module_id = %id,
                reachable = probe.reachable,
                score = update.snapshot.score,
                "Health probe recorded"
            );
        }

        self.store.save_module(&module).await?;
        Ok(update)
    }

    fn apply_probe(module: &mut Module, probe: ProbeResult, policy: &HealthPolicy) -> HealthUpdate {
        let previous_status = module.status;
        let now = Utc::now();
        let alpha = policy.smoothing_factor;

        module.health_score =
            (alpha * probe.score() + (1.0 - alpha) * module.health_score).clamp(0.0, 1.0);

        if probe.reachable {
            module.consecutive_failures = 0;
            module.status = ModuleStatus::Active;
            module.last_seen = Some(now);
        } else {
            module.consecutive_failures = module.consecutive_failures.saturating_add(1);
            if module.consecutive_failures >= policy.failure_threshold {
                module.status = ModuleStatus::Offline;
            } else if module.status != ModuleStatus::Offline {
                module.status = ModuleStatus::Degraded;
            }
        }
        module.updated_at = now;

        let snapshot = HealthSnapshot {
            module_id: module.id.clone(),
            timestamp: now,
            reachable: probe.reachable,
            latency_ms: probe.latency.as_millis() as u64,
            score: module.health_score,
            status: module.status,
        };

        module.health_history.push_back(snapshot.clone());
        while module.health_history.len() > policy.history_size {
            module.health_history.pop_front();
        }

        HealthUpdate {
            snapshot,
            previous_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::time::Duration;

    fn registry() -> ModuleRegistry {
        ModuleRegistry::new(HealthPolicy::default(), Arc::new(MemoryStore::new()))
    }

    fn fail() -> ProbeResult {
        ProbeResult::unreachable(Duration::from_millis(5))
    }

    fn ok() -> ProbeResult {
        ProbeResult::reachable(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_register_is_idempotent_and_preserves_health() {
        let registry = registry();
        registry
            .register(ModuleDescriptor::new("kitchen", "Kitchen", "http://kitchen:1"))
            .await
            .unwrap();
        registry.mark_health("kitchen", fail()).await.unwrap();

        let updated = registry
            .register(ModuleDescriptor::new("kitchen", "Kitchen", "http://kitchen:2"))
            .await
            .unwrap();

        assert_eq!(updated.address, "http://kitchen:2");
        assert_eq!(updated.status, ModuleStatus::Degraded);
        assert_eq!(updated.health_history.len(), 1);
        assert!((updated.health_score - 0.7).abs() < 1e-9);
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_module() {
        let registry = registry();
        assert!(matches!(
            registry.get("ghost"),
            Err(BusError::NotFound { entity: "module", .. })
        ));
    }

    #[tokio::test]
    async fn test_offline_after_three_failures_and_back_after_one_success() {
        let registry = registry();
        registry
            .register(ModuleDescriptor::new("kitchen", "Kitchen", "http://kitchen"))
            .await
            .unwrap();

        let first = registry.mark_health("kitchen", fail()).await.unwrap();
        assert_eq!(first.snapshot.status, ModuleStatus::Degraded);
        let second = registry.mark_health("kitchen", fail()).await.unwrap();
        assert_eq!(second.snapshot.status, ModuleStatus::Degraded);
        let third = registry.mark_health("kitchen", fail()).await.unwrap();
        assert_eq!(third.snapshot.status, ModuleStatus::Offline);
        assert!(third.status_changed());
        assert!(registry.list_active().is_empty());

        let recovered = registry.mark_health("kitchen", ok()).await.unwrap();
        assert_eq!(recovered.previous_status, ModuleStatus::Offline);
        assert_eq!(recovered.snapshot.status, ModuleStatus::Active);
        assert_eq!(registry.list_active().len(), 1);
    }

    #[tokio::test]
    async fn test_score_is_exponential_moving_average() {
        let registry = registry();
        registry
            .register(ModuleDescriptor::new("sensors", "Sensors", "http://sensors"))
            .await
            .unwrap();

        // 1.0 -> 0.7 -> 0.49 -> 0.643
        registry.mark_health("sensors", fail()).await.unwrap();
        registry.mark_health("sensors", fail()).await.unwrap();
        let update = registry.mark_health("sensors", ok()).await.unwrap();
        assert!((update.snapshot.score - 0.643).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let policy = HealthPolicy {
            history_size: 3,
            ..HealthPolicy::default()
        };
        let registry = ModuleRegistry::new(policy, Arc::new(MemoryStore::new()));
        registry
            .register(ModuleDescriptor::new("pos", "POS", "http://pos"))
            .await
            .unwrap();
        for _ in 0..5 {
            registry.mark_health("pos", ok()).await.unwrap();
        }
        assert_eq!(registry.get("pos").unwrap().health_history.len(), 3);
    }

    #[tokio::test]
    async fn test_deactivate_excludes_from_probes() {
        let registry = registry();
        registry
            .register(ModuleDescriptor::new("pos", "POS", "http://pos"))
            .await
            .unwrap();
        registry
            .register(ModuleDescriptor::new("kitchen", "Kitchen", "http://kitchen"))
            .await
            .unwrap();

        registry.deactivate("pos").await.unwrap();

        let candidates: Vec<_> = registry
            .probe_candidates()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(candidates, vec!["kitchen".to_string()]);
        assert!(!registry.get("pos").unwrap().is_deliverable());
        assert_eq!(registry.list().len(), 2);
    }

    #[tokio::test]
    async fn test_restore_from_store() {
        let store: Arc<dyn BusStore> = Arc::new(MemoryStore::new());
        let registry = ModuleRegistry::new(HealthPolicy::default(), store.clone());
        registry
            .register(ModuleDescriptor::new("pos", "POS", "http://pos"))
            .await
            .unwrap();
        registry.mark_health("pos", fail()).await.unwrap();

        let reloaded = ModuleRegistry::new(HealthPolicy::default(), store);
        assert_eq!(reloaded.restore().await.unwrap(), 1);
        let module = reloaded.get("pos").unwrap();
        assert_eq!(module.status, ModuleStatus::Degraded);
        assert_eq!(module.consecutive_failures, 1);
    }
}
