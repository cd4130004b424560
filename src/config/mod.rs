//! # Integration Bus Configuration
//!
//! Typed configuration for every bus component. All sections carry serde
//! defaults, so an empty document (or no document at all) yields a working
//! in-memory bus with HTTP delivery.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use integration_bus::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected)
//! let manager = ConfigManager::load()?;
//!
//! let retries = manager.config().dispatcher.max_retries;
//! let timeout = manager.config().delivery.timeout();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants;
use crate::models::{IntegrationRule, ModuleDescriptor};

/// Root configuration structure mirroring `config/bus.yaml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    pub dispatcher: DispatcherConfig,
    pub delivery: DeliveryConfig,
    pub health: HealthConfig,
    pub ingress: IngressConfig,
    pub events: EventsConfig,
    pub storage: StorageConfig,
    /// Modules registered at bootstrap
    pub modules: Vec<ModuleDescriptor>,
    /// Rules upserted into the catalog at bootstrap
    pub rules: Vec<IntegrationRule>,
    /// Declarative field-mapping transforms
    pub transforms: Vec<TransformDefinition>,
}

/// Dispatch loop and retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Terminal envelopes kept for `envelope()` lookups; older ones are served
    /// from the sync log only
    pub completed_retention: usize,
}

impl DispatcherConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: constants::dispatch::DEFAULT_MAX_RETRIES,
            base_backoff_ms: constants::dispatch::DEFAULT_BASE_BACKOFF.as_millis() as u64,
            max_backoff_ms: constants::dispatch::DEFAULT_MAX_BACKOFF.as_millis() as u64,
            completed_retention: constants::dispatch::DEFAULT_COMPLETED_RETENTION,
        }
    }
}

/// Which delivery client the bus talks to modules through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    Http,
    /// In-process client that records deliveries instead of sending them
    Sandbox,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
    pub timeout_ms: u64,
    pub delivery_path: String,
    pub probe_path: String,
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Http,
            timeout_ms: constants::delivery::DEFAULT_TIMEOUT.as_millis() as u64,
            delivery_path: constants::delivery::DEFAULT_DELIVERY_PATH.to_string(),
            probe_path: constants::delivery::DEFAULT_PROBE_PATH.to_string(),
        }
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub probe_timeout_ms: u64,
    pub failure_threshold: u32,
    /// Weight of the newest probe in the moving average
    pub smoothing_factor: f64,
    pub history_size: usize,
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: constants::health::DEFAULT_INTERVAL.as_secs(),
            probe_timeout_ms: constants::health::DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
            failure_threshold: constants::health::DEFAULT_FAILURE_THRESHOLD,
            smoothing_factor: constants::health::DEFAULT_SMOOTHING_FACTOR,
            history_size: constants::health::DEFAULT_HISTORY_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngressConfig {
    pub max_payload_bytes: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: constants::ingress::DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: constants::events::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
    Postgres,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the file backend
    pub directory: Option<PathBuf>,
    /// Connection URL for the postgres backend
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            directory: None,
            database_url: None,
            max_connections: 5,
        }
    }
}

/// Field-mapping transform declared in configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TransformDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
    /// Fixed values merged into every output
    #[serde(default)]
    pub constants: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldMapping {
    /// Dotted path into the input object, e.g. `customer.name`
    pub from: String,
    pub to: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl BusConfig {
    /// Validate cross-field constraints
    pub fn validate(&self) -> ConfigResult<()> {
        if self.dispatcher.base_backoff_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatcher.base_backoff_ms",
                "0",
                "backoff base must be positive",
            ));
        }
        if self.dispatcher.base_backoff_ms > self.dispatcher.max_backoff_ms {
            return Err(ConfigurationError::validation_error(format!(
                "dispatcher.base_backoff_ms ({}) exceeds dispatcher.max_backoff_ms ({})",
                self.dispatcher.base_backoff_ms, self.dispatcher.max_backoff_ms
            )));
        }
        if self.delivery.timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "delivery.timeout_ms",
                "0",
                "delivery timeout must be positive",
            ));
        }
        if self.health.interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "health.interval_seconds",
                "0",
                "health interval must be positive",
            ));
        }
        if self.health.probe_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "health.probe_timeout_ms",
                "0",
                "probe timeout must be positive",
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "health.failure_threshold",
                "0",
                "at least one failed probe must be required before going offline",
            ));
        }
        if !(self.health.smoothing_factor > 0.0 && self.health.smoothing_factor <= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "health.smoothing_factor",
                self.health.smoothing_factor.to_string(),
                "must be in (0, 1]",
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "broadcast channel needs capacity",
            ));
        }

        match self.storage.backend {
            StorageBackend::File if self.storage.directory.is_none() => {
                return Err(ConfigurationError::missing_required_field(
                    "directory",
                    "storage (file backend)",
                ));
            }
            StorageBackend::Postgres if self.storage.database_url.is_none() => {
                return Err(ConfigurationError::missing_required_field(
                    "database_url",
                    "storage (postgres backend)",
                ));
            }
            _ => {}
        }

        let mut transform_names: HashSet<&str> = [
            constants::transforms::IDENTITY,
            constants::transforms::SALE_TO_KITCHEN_TICKET,
            constants::transforms::ORDER_TO_INVOICE,
            constants::transforms::SENSOR_READING_TO_ALERT,
        ]
        .into_iter()
        .collect();
        for definition in &self.transforms {
            if definition.name.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "name",
                    "transforms",
                ));
            }
            transform_names.insert(definition.name.as_str());
        }

        for module in &self.modules {
            module
                .validate()
                .map_err(|e| ConfigurationError::validation_error(e.to_string()))?;
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.rules {
            rule.validate()
                .map_err(|e| ConfigurationError::validation_error(e.to_string()))?;
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(ConfigurationError::validation_error(format!(
                    "duplicate rule id '{}'",
                    rule.id
                )));
            }
            for target in &rule.targets {
                if !transform_names.contains(target.transform.as_str()) {
                    return Err(ConfigurationError::validation_error(format!(
                        "rule '{}' references undefined transform '{}'",
                        rule.id, target.transform
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, RuleTarget};

    #[test]
    fn test_defaults_are_valid() {
        let config = BusConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatcher.max_retries, 2);
        assert_eq!(config.delivery.timeout(), Duration::from_secs(10));
        assert_eq!(config.health.interval(), Duration::from_secs(30));
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_backoff_bounds() {
        let mut config = BusConfig::default();
        config.dispatcher.base_backoff_ms = 120_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_file_backend_requires_directory() {
        let mut config = BusConfig::default();
        config.storage.backend = StorageBackend::File;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
        config.storage.directory = Some(PathBuf::from("/tmp/bus"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rules_must_reference_known_transforms() {
        let mut config = BusConfig::default();
        config.rules.push(IntegrationRule::new(
            "pos-finance",
            "pos",
            [EventType::SaleCompleted],
            [RuleTarget::new("finance", "sale_to_ledger_line")],
        ));
        assert!(config.validate().is_err());

        config.transforms.push(TransformDefinition {
            name: "sale_to_ledger_line".to_string(),
            fields: vec![FieldMapping {
                from: "total".to_string(),
                to: "amount".to_string(),
                required: true,
            }],
            constants: Map::new(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_smoothing_factor_range() {
        let mut config = BusConfig::default();
        config.health.smoothing_factor = 0.0;
        assert!(config.validate().is_err());
        config.health.smoothing_factor = 1.0;
        assert!(config.validate().is_ok());
    }
}
