//! In-process delivery client.
//!
//! Records every delivery instead of sending it. Responses can be fixed per
//! module or scripted attempt-by-attempt, which is how tests drive retry,
//! timeout and outage scenarios.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::{DeliveryClient, DeliveryReceipt, DeliveryRequest};
use crate::error::DeliveryError;
use crate::models::{EnvelopeId, EventType, Module, ModuleId, ProbeResult};

/// How the sandbox answers one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxResponse {
    #[default]
    Accept,
    Reject { status: u16 },
    /// Connection refused
    Refuse,
    /// Accept only after sleeping; exceeds the delivery timeout when long enough
    Hang(Duration),
}

/// A delivery the sandbox saw, accepted or not
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDelivery {
    pub target_id: ModuleId,
    pub envelope_id: EnvelopeId,
    pub rule_id: String,
    pub event_type: EventType,
    pub payload: Value,
    pub accepted: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct ModuleBehavior {
    fixed: SandboxResponse,
    script: VecDeque<SandboxResponse>,
    unreachable: bool,
}

#[derive(Debug, Default)]
pub struct SandboxDeliveryClient {
    behaviors: Mutex<HashMap<ModuleId, ModuleBehavior>>,
    deliveries: Mutex<Vec<RecordedDelivery>>,
}

impl SandboxDeliveryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every delivery to `module_id` with `response` once any script runs out
    pub fn set_response(&self, module_id: &str, response: SandboxResponse) {
        self.behaviors
            .lock()
            .entry(module_id.to_string())
            .or_default()
            .fixed = response;
    }

    /// Queue responses for the next deliveries to `module_id`
    pub fn script(&self, module_id: &str, responses: impl IntoIterator<Item = SandboxResponse>) {
        self.behaviors
            .lock()
            .entry(module_id.to_string())
            .or_default()
            .script
            .extend(responses);
    }

    /// Control probe results. Unreachable modules also refuse deliveries.
    pub fn set_reachable(&self, module_id: &str, reachable: bool) {
        self.behaviors
            .lock()
            .entry(module_id.to_string())
            .or_default()
            .unreachable = !reachable;
    }

    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.lock().clone()
    }

    /// Accepted deliveries for one target, in arrival order
    pub fn delivered_to(&self, module_id: &str) -> Vec<RecordedDelivery> {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| d.target_id == module_id && d.accepted)
            .cloned()
            .collect()
    }

    /// Every attempt against one target, accepted or not
    pub fn attempts_to(&self, module_id: &str) -> usize {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| d.target_id == module_id)
            .count()
    }

    fn next_response(&self, module_id: &str) -> SandboxResponse {
        let mut behaviors = self.behaviors.lock();
        match behaviors.get_mut(module_id) {
            Some(behavior) if behavior.unreachable => SandboxResponse::Refuse,
            Some(behavior) => behavior.script.pop_front().unwrap_or(behavior.fixed),
            None => SandboxResponse::Accept,
        }
    }

    fn record(&self, target: &Module, request: &DeliveryRequest, accepted: bool) -> usize {
        let mut deliveries = self.deliveries.lock();
        deliveries.push(RecordedDelivery {
            target_id: target.id.clone(),
            envelope_id: request.envelope_id,
            rule_id: request.rule_id.clone(),
            event_type: request.event_type.clone(),
            payload: request.payload.clone(),
            accepted,
            at: Utc::now(),
        });
        deliveries.len() - 1
    }
}

#[async_trait]
impl DeliveryClient for SandboxDeliveryClient {
    async fn deliver(
        &self,
        target: &Module,
        request: &DeliveryRequest,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let started = Instant::now();
        let response = self.next_response(&target.id);

        let outcome = match response {
            SandboxResponse::Accept => {
                self.record(target, request, true);
                Ok(())
            }
            SandboxResponse::Hang(delay) => {
                // Recorded as unaccepted first; a caller timeout drops this future mid-sleep
                let index = self.record(target, request, false);
                tokio::time::sleep(delay).await;
                if let Some(delivery) = self.deliveries.lock().get_mut(index) {
                    delivery.accepted = true;
                }
                Ok(())
            }
            SandboxResponse::Reject { status } => {
                self.record(target, request, false);
                Err(DeliveryError::Rejected {
                    module_id: target.id.clone(),
                    status,
                })
            }
            SandboxResponse::Refuse => {
                self.record(target, request, false);
                Err(DeliveryError::Connection {
                    module_id: target.id.clone(),
                    reason: "connection refused".to_string(),
                })
            }
        };

        outcome.map(|()| DeliveryReceipt {
            target_id: target.id.clone(),
            status: None,
            latency: started.elapsed(),
        })
    }

    async fn probe(&self, target: &Module) -> ProbeResult {
        let reachable = self
            .behaviors
            .lock()
            .get(&target.id)
            .map(|behavior| !behavior.unreachable)
            .unwrap_or(true);
        if reachable {
            ProbeResult::reachable(Duration::ZERO)
        } else {
            ProbeResult::unreachable(Duration::ZERO)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModuleDescriptor;
    use serde_json::json;

    fn target() -> Module {
        Module::from_descriptor(ModuleDescriptor::new("kitchen", "Kitchen", "sandbox://kitchen"))
    }

    fn request() -> DeliveryRequest {
        DeliveryRequest {
            envelope_id: uuid::Uuid::new_v4(),
            source_id: "pos".to_string(),
            event_type: EventType::SaleCompleted,
            rule_id: "pos-kitchen".to_string(),
            payload: json!({"ticket": 1}),
        }
    }

    #[tokio::test]
    async fn test_script_runs_before_fixed_response() {
        let sandbox = SandboxDeliveryClient::new();
        sandbox.script(
            "kitchen",
            [SandboxResponse::Refuse, SandboxResponse::Reject { status: 503 }],
        );

        assert!(matches!(
            sandbox.deliver(&target(), &request()).await,
            Err(DeliveryError::Connection { .. })
        ));
        assert!(matches!(
            sandbox.deliver(&target(), &request()).await,
            Err(DeliveryError::Rejected { status: 503, .. })
        ));
        assert!(sandbox.deliver(&target(), &request()).await.is_ok());

        assert_eq!(sandbox.attempts_to("kitchen"), 3);
        assert_eq!(sandbox.delivered_to("kitchen").len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_module_refuses_and_fails_probe() {
        let sandbox = SandboxDeliveryClient::new();
        sandbox.set_reachable("kitchen", false);
        assert!(!sandbox.probe(&target()).await.reachable);
        assert!(sandbox.deliver(&target(), &request()).await.is_err());

        sandbox.set_reachable("kitchen", true);
        assert!(sandbox.probe(&target()).await.reachable);
    }
}
