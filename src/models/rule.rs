use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event_type::EventType;
use super::module::ModuleId;
use crate::error::{BusError, Result};

/// One (target module, transform) pair of a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleTarget {
    pub target_id: ModuleId,
    pub transform: String,
}

impl RuleTarget {
    pub fn new(target_id: impl Into<String>, transform: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            transform: transform.into(),
        }
    }
}

/// Declarative mapping from a source module's events to interested targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationRule {
    pub id: String,
    pub source_id: ModuleId,
    pub event_types: Vec<EventType>,
    pub targets: Vec<RuleTarget>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher weights resolve first
    #[serde(default)]
    pub priority_weight: i32,
    #[serde(default)]
    pub description: Option<String>,
    /// Registration order, assigned by the catalog
    #[serde(default)]
    pub sequence: u64,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl IntegrationRule {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        event_types: impl IntoIterator<Item = EventType>,
        targets: impl IntoIterator<Item = RuleTarget>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            event_types: event_types.into_iter().collect(),
            targets: targets.into_iter().collect(),
            enabled: true,
            priority_weight: 0,
            description: None,
            sequence: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_priority_weight(mut self, weight: i32) -> Self {
        self.priority_weight = weight;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn matches(&self, source_id: &str, event_type: &EventType) -> bool {
        self.enabled && self.source_id == source_id && self.event_types.contains(event_type)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BusError::ValidationError(
                "rule id must not be empty".to_string(),
            ));
        }
        if self.source_id.trim().is_empty() {
            return Err(BusError::ValidationError(format!(
                "rule {} has no source module",
                self.id
            )));
        }
        if self.event_types.is_empty() || self.event_types.iter().any(EventType::is_empty) {
            return Err(BusError::ValidationError(format!(
                "rule {} must match at least one non-empty event type",
                self.id
            )));
        }
        if self.targets.is_empty() {
            return Err(BusError::ValidationError(format!(
                "rule {} has no targets",
                self.id
            )));
        }
        for target in &self.targets {
            if target.target_id.trim().is_empty() || target.transform.trim().is_empty() {
                return Err(BusError::ValidationError(format!(
                    "rule {} has a target without module or transform",
                    self.id
                )));
            }
        }
        Ok(())
    }
}
