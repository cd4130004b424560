//! # Module
//!
//! A business-capability module known to the bus. Modules are created on
//! registration and afterwards only touched by re-registration, deactivation and
//! the health monitor. They are never removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use super::event_type::EventType;
use super::health::HealthSnapshot;
use crate::constants::health::INITIAL_HEALTH_SCORE;
use crate::error::{BusError, Result};

pub type ModuleId = String;

/// Reachability status maintained by the health monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Active,
    /// Reachable recently but at least one probe has failed since
    Degraded,
    Offline,
}

impl ModuleStatus {
    pub fn is_deliverable(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Degraded => write!(f, "degraded"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

impl FromStr for ModuleStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "degraded" => Ok(Self::Degraded),
            "offline" => Ok(Self::Offline),
            _ => Err(format!("Invalid module status: {s}")),
        }
    }
}

/// Registration call payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub module_id: ModuleId,
    pub display_name: String,
    pub address: String,
    #[serde(default)]
    pub accepted_event_types: Vec<EventType>,
    #[serde(default)]
    pub emitted_event_types: Vec<EventType>,
}

impl ModuleDescriptor {
    pub fn new(
        module_id: impl Into<String>,
        display_name: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            display_name: display_name.into(),
            address: address.into(),
            accepted_event_types: Vec::new(),
            emitted_event_types: Vec::new(),
        }
    }

    pub fn accepts(mut self, event_types: impl IntoIterator<Item = EventType>) -> Self {
        self.accepted_event_types.extend(event_types);
        self
    }

    pub fn emits(mut self, event_types: impl IntoIterator<Item = EventType>) -> Self {
        self.emitted_event_types.extend(event_types);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.module_id.trim().is_empty() {
            return Err(BusError::ValidationError(
                "module_id must not be empty".to_string(),
            ));
        }
        if self
            .module_id
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(BusError::ValidationError(format!(
                "module_id '{}' must not contain whitespace",
                self.module_id
            )));
        }
        if self.address.trim().is_empty() {
            return Err(BusError::ValidationError(format!(
                "module {} has no address",
                self.module_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub display_name: String,
    pub status: ModuleStatus,
    pub last_seen: Option<DateTime<Utc>>,
    /// Rolling health score in [0, 1]
    pub health_score: f64,
    pub address: String,
    pub accepted_event_types: Vec<EventType>,
    pub emitted_event_types: Vec<EventType>,
    /// False once deactivated; the health monitor skips disabled modules
    pub enabled: bool,
    pub consecutive_failures: u32,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub health_history: VecDeque<HealthSnapshot>,
}

impl Module {
    pub fn from_descriptor(descriptor: ModuleDescriptor) -> Self {
        let now = Utc::now();
        Self {
            id: descriptor.module_id,
            display_name: descriptor.display_name,
            status: ModuleStatus::Active,
            last_seen: None,
            health_score: INITIAL_HEALTH_SCORE,
            address: descriptor.address,
            accepted_event_types: descriptor.accepted_event_types,
            emitted_event_types: descriptor.emitted_event_types,
            enabled: true,
            consecutive_failures: 0,
            registered_at: now,
            updated_at: now,
            health_history: VecDeque::new(),
        }
    }

    /// Apply a re-registration: identity and capabilities change, health stays.
    /// A deactivated module comes back as active.
    pub fn apply_descriptor(&mut self, descriptor: ModuleDescriptor) {
        self.display_name = descriptor.display_name;
        self.address = descriptor.address;
        self.accepted_event_types = descriptor.accepted_event_types;
        self.emitted_event_types = descriptor.emitted_event_types;
        if !self.enabled {
            self.enabled = true;
            self.status = ModuleStatus::Active;
            self.consecutive_failures = 0;
        }
        self.updated_at = Utc::now();
    }

    pub fn is_deliverable(&self) -> bool {
        self.enabled && self.status.is_deliverable()
    }

    pub fn accepts(&self, event_type: &EventType) -> bool {
        self.accepted_event_types.is_empty() || self.accepted_event_types.contains(event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_validation() {
        assert!(ModuleDescriptor::new("pos", "Point of Sale", "http://pos:8080")
            .validate()
            .is_ok());
        assert!(matches!(
            ModuleDescriptor::new("", "Nameless", "http://x").validate(),
            Err(BusError::ValidationError(_))
        ));
        assert!(matches!(
            ModuleDescriptor::new("front desk", "Front Desk", "http://x").validate(),
            Err(BusError::ValidationError(_))
        ));
        assert!(ModuleDescriptor::new("pos", "Point of Sale", " ")
            .validate()
            .is_err());
    }

    #[test]
    fn test_apply_descriptor_keeps_health() {
        let mut module = Module::from_descriptor(ModuleDescriptor::new(
            "kitchen",
            "Kitchen",
            "http://kitchen:8080",
        ));
        module.health_score = 0.42;
        module.status = ModuleStatus::Degraded;

        module.apply_descriptor(
            ModuleDescriptor::new("kitchen", "Kitchen Display", "http://kitchen-v2:8080")
                .accepts([EventType::SaleCompleted]),
        );

        assert_eq!(module.address, "http://kitchen-v2:8080");
        assert_eq!(module.display_name, "Kitchen Display");
        assert_eq!(module.health_score, 0.42);
        assert_eq!(module.status, ModuleStatus::Degraded);
        assert!(module.enabled);
        assert!(module.accepts(&EventType::SaleCompleted));
        assert!(!module.accepts(&EventType::SensorReading));
    }

    #[test]
    fn test_reregistration_reactivates_deactivated_module() {
        let descriptor = ModuleDescriptor::new("finance", "Finance", "http://finance:8080");
        let mut module = Module::from_descriptor(descriptor.clone());
        module.enabled = false;
        module.status = ModuleStatus::Offline;
        module.consecutive_failures = 4;

        module.apply_descriptor(descriptor);

        assert!(module.enabled);
        assert_eq!(module.status, ModuleStatus::Active);
        assert_eq!(module.consecutive_failures, 0);
        assert!(module.is_deliverable());
    }
}
