use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::constants;
use crate::models::{EnvelopeId, EventType, ModuleId, ModuleStatus, Priority};
use crate::state_machine::DeliveryState;

/// Lifecycle notification emitted by the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusEvent {
    EnvelopeAccepted {
        envelope_id: EnvelopeId,
        source_id: ModuleId,
        event_type: EventType,
        priority: Priority,
        at: DateTime<Utc>,
    },
    EnvelopeRetryScheduled {
        envelope_id: EnvelopeId,
        retry_count: u32,
        delay_ms: u64,
        pending_targets: Vec<ModuleId>,
        at: DateTime<Utc>,
    },
    EnvelopeCompleted {
        envelope_id: EnvelopeId,
        state: DeliveryState,
        delivered: usize,
        undelivered: Vec<ModuleId>,
        at: DateTime<Utc>,
    },
    ModuleStatusChanged {
        module_id: ModuleId,
        from: ModuleStatus,
        to: ModuleStatus,
        health_score: f64,
        at: DateTime<Utc>,
    },
}

impl BusEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BusEvent::EnvelopeAccepted { .. } => "envelope.accepted",
            BusEvent::EnvelopeRetryScheduled { .. } => "envelope.retry_scheduled",
            BusEvent::EnvelopeCompleted { .. } => "envelope.completed",
            BusEvent::ModuleStatusChanged { .. } => "module.status_changed",
        }
    }

    pub fn envelope_id(&self) -> Option<EnvelopeId> {
        match self {
            BusEvent::EnvelopeAccepted { envelope_id, .. }
            | BusEvent::EnvelopeRetryScheduled { envelope_id, .. }
            | BusEvent::EnvelopeCompleted { envelope_id, .. } => Some(*envelope_id),
            BusEvent::ModuleStatusChanged { .. } => None,
        }
    }
}

/// Fan-out publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<BusEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current subscriber, returning how many received it.
    ///
    /// `send` only fails when there are no receivers, which is not an error here.
    pub fn publish(&self, event: BusEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!("No lifecycle subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(constants::events::DEFAULT_CHANNEL_CAPACITY)
    }
}
