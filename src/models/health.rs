use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::module::{ModuleId, ModuleStatus};

/// Outcome of a single liveness probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub reachable: bool,
    pub latency: Duration,
}

impl ProbeResult {
    pub fn reachable(latency: Duration) -> Self {
        Self {
            reachable: true,
            latency,
        }
    }

    pub fn unreachable(latency: Duration) -> Self {
        Self {
            reachable: false,
            latency,
        }
    }

    /// Probe value fed into the moving average
    pub fn score(&self) -> f64 {
        if self.reachable {
            1.0
        } else {
            0.0
        }
    }
}

/// Recorded result of one probe after the registry applied it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub module_id: ModuleId,
    pub timestamp: DateTime<Utc>,
    pub reachable: bool,
    pub latency_ms: u64,
    /// Rolling score after this probe
    pub score: f64,
    pub status: ModuleStatus,
}
