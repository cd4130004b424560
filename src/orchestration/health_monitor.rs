//! # Health Monitor
//!
//! Probes every enabled module on a fixed interval and folds the results into
//! the registry. Runs independently of the dispatcher; the dispatcher only sees
//! its effect through module status.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::delivery::DeliveryClient;
use crate::events::{BusEvent, EventPublisher};
use crate::models::{HealthSnapshot, ProbeResult};
use crate::registry::ModuleRegistry;

#[derive(Debug)]
pub struct HealthMonitor {
    registry: Arc<ModuleRegistry>,
    delivery: Arc<dyn DeliveryClient>,
    events: EventPublisher,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        delivery: Arc<dyn DeliveryClient>,
        events: EventPublisher,
        config: &HealthConfig,
    ) -> Self {
        Self {
            registry,
            delivery,
            events,
            interval: config.interval(),
            probe_timeout: config.probe_timeout(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Probe every candidate once and return the recorded snapshots
    pub async fn probe_once(&self) -> Vec<HealthSnapshot> {
        let candidates = self.registry.probe_candidates();
        let probes = join_all(candidates.iter().map(|module| async move {
            let result = tokio::time::timeout(self.probe_timeout, self.delivery.probe(module))
                .await
                .unwrap_or_else(|_| ProbeResult::unreachable(self.probe_timeout));
            (module.id.clone(), result)
        }))
        .await;

        let mut snapshots = Vec::with_capacity(probes.len());
        for (module_id, result) in probes {
            match self.registry.mark_health(&module_id, result).await {
                Ok(update) => {
                    if update.status_changed() {
                        self.events.publish(BusEvent::ModuleStatusChanged {
                            module_id: module_id.clone(),
                            from: update.previous_status,
                            to: update.snapshot.status,
                            health_score: update.snapshot.score,
                            at: Utc::now(),
                        });
                    }
                    snapshots.push(update.snapshot);
                }
                Err(e) => warn!(module_id = %module_id, error = %e, "Failed to record probe"),
            }
        }

        debug!(probed = snapshots.len(), "Health round complete");
        snapshots
    }

    /// Probe on every tick until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_seconds = self.interval.as_secs(),
            probe_timeout_ms = self.probe_timeout.as_millis() as u64,
            "🩺 HEALTH MONITOR: Started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("🛑 HEALTH MONITOR: Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::SandboxDeliveryClient;
    use crate::models::{ModuleDescriptor, ModuleStatus};
    use crate::registry::HealthPolicy;
    use crate::storage::MemoryStore;

    async fn setup() -> (Arc<ModuleRegistry>, Arc<SandboxDeliveryClient>, HealthMonitor) {
        let registry = Arc::new(ModuleRegistry::new(
            HealthPolicy::default(),
            Arc::new(MemoryStore::new()),
        ));
        registry
            .register(ModuleDescriptor::new("kitchen", "Kitchen", "sandbox://kitchen"))
            .await
            .unwrap();
        let sandbox = Arc::new(SandboxDeliveryClient::new());
        let monitor = HealthMonitor::new(
            registry.clone(),
            sandbox.clone(),
            EventPublisher::default(),
            &HealthConfig::default(),
        );
        (registry, sandbox, monitor)
    }

    #[tokio::test]
    async fn test_three_failed_rounds_take_module_offline() {
        let (registry, sandbox, monitor) = setup().await;
        let mut events = monitor.events.subscribe();
        sandbox.set_reachable("kitchen", false);

        for _ in 0..3 {
            monitor.probe_once().await;
        }
        assert_eq!(registry.get("kitchen").unwrap().status, ModuleStatus::Offline);

        sandbox.set_reachable("kitchen", true);
        let snapshots = monitor.probe_once().await;
        assert_eq!(snapshots[0].status, ModuleStatus::Active);

        // active -> degraded, degraded -> offline, offline -> active
        let mut transitions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let BusEvent::ModuleStatusChanged { to, .. } = event {
                transitions.push(to);
            }
        }
        assert_eq!(
            transitions,
            vec![ModuleStatus::Degraded, ModuleStatus::Offline, ModuleStatus::Active]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_registry, _sandbox, monitor) = setup().await;
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(Arc::new(monitor).run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
