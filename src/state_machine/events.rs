use serde::{Deserialize, Serialize};

/// Events that drive envelope state transitions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum EnvelopeEvent {
    /// Dispatcher claimed the envelope from the queue
    Claim,
    /// Every target accepted the payload
    Deliver,
    /// Retry budget spent after some targets succeeded
    Partial(String),
    /// Failed targets requeued for another round
    ScheduleRetry,
    /// Retry budget spent with nothing delivered
    Abandon(String),
    /// Operator cancellation of a queued envelope
    Cancel,
}

impl EnvelopeEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Deliver => "deliver",
            Self::Partial(_) => "partial",
            Self::ScheduleRetry => "schedule_retry",
            Self::Abandon(_) => "abandon",
            Self::Cancel => "cancel",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Partial(reason) | Self::Abandon(reason) => Some(reason),
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Deliver | Self::Partial(_) | Self::Abandon(_) | Self::Cancel
        )
    }
}
