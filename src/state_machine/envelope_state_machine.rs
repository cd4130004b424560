use chrono::Utc;
use tracing::debug;

use super::{events::EnvelopeEvent, states::DeliveryState};
use crate::error::{BusError, Result};
use crate::models::EventEnvelope;

/// Validates and applies envelope transitions.
///
/// Only the dispatcher (and cancellation, which runs under the queue lock) drives
/// envelopes through this machine, so a rejected transition means the bus's own
/// bookkeeping is corrupt.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeStateMachine;

impl EnvelopeStateMachine {
    /// Apply `event` to the envelope and return the new state
    pub fn transition(envelope: &mut EventEnvelope, event: &EnvelopeEvent) -> Result<DeliveryState> {
        let current = envelope.state;
        let target = Self::determine_target_state(envelope, current, event)?;

        debug!(
            envelope_id = %envelope.id,
            from = %current,
            to = %target,
            event = event.event_type(),
            "Envelope transition"
        );

        envelope.state = target;
        envelope.updated_at = Utc::now();
        Ok(target)
    }

    /// Check whether `event` is allowed from the envelope's current state
    pub fn can_transition(envelope: &EventEnvelope, event: &EnvelopeEvent) -> bool {
        Self::determine_target_state(envelope, envelope.state, event).is_ok()
    }

    fn determine_target_state(
        envelope: &EventEnvelope,
        current: DeliveryState,
        event: &EnvelopeEvent,
    ) -> Result<DeliveryState> {
        let target = match (current, event) {
            // Claims, first dispatch and retries
            (DeliveryState::Pending, EnvelopeEvent::Claim) => DeliveryState::Processing,
            (DeliveryState::Failed, EnvelopeEvent::Claim) => DeliveryState::Processing,

            // Round outcomes
            (DeliveryState::Processing, EnvelopeEvent::Deliver) => DeliveryState::Delivered,
            (DeliveryState::Processing, EnvelopeEvent::ScheduleRetry) => DeliveryState::Failed,
            (DeliveryState::Processing, EnvelopeEvent::Partial(_)) => DeliveryState::Partial,
            (DeliveryState::Processing, EnvelopeEvent::Abandon(_)) => DeliveryState::Abandoned,

            // Cancellation only applies to queued envelopes
            (DeliveryState::Pending, EnvelopeEvent::Cancel) => DeliveryState::Abandoned,
            (DeliveryState::Failed, EnvelopeEvent::Cancel) => {
                if envelope.any_delivered() {
                    DeliveryState::Partial
                } else {
                    DeliveryState::Abandoned
                }
            }

            (from, _) => {
                return Err(BusError::InvalidStateTransition {
                    envelope_id: envelope.id,
                    from: from.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }
}
