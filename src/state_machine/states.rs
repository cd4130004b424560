use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope delivery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Accepted and waiting for its first dispatch
    Pending,
    /// Claimed by the dispatcher; target attempts are in flight
    Processing,
    /// Every resolved target accepted the payload
    Delivered,
    /// Retry budget spent with at least one target delivered
    Partial,
    /// At least one target failed; a retry is scheduled
    Failed,
    /// Retry budget spent (or cancelled) without any target delivered
    Abandoned,
}

impl DeliveryState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Partial | Self::Abandoned)
    }

    /// Check if the envelope sits in the queue waiting to be claimed
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Delivered => write!(f, "delivered"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl std::str::FromStr for DeliveryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "delivered" => Ok(Self::Delivered),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(format!("Invalid delivery state: {s}")),
        }
    }
}
