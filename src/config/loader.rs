//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered in order:
//!
//! 1. `{config_dir}/bus.{yaml,toml,json}` (optional)
//! 2. `{config_dir}/bus.{environment}.{yaml,toml,json}` (optional)
//! 3. `BUS__SECTION__FIELD` environment variables
//!
//! Later sources override earlier ones.

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::BusConfig;
use crate::constants::DEFAULT_CONFIG_DIRECTORY;

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: BusConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory =
            config_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIRECTORY));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_layered(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = environment,
            storage_backend = ?config.storage.backend,
            delivery_mode = ?config.delivery.mode,
            modules = config.modules.len(),
            rules = config.rules.len(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (programmatic setups and tests)
    pub fn from_config(config: BusConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from(DEFAULT_CONFIG_DIRECTORY),
        }))
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect the environment from `BUS_ENV`, then `APP_ENV`
    pub fn detect_environment() -> String {
        env::var("BUS_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    /// Configuration as JSON with credentials masked, for logging
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::json!(self.config);
        Self::sanitize_json_recursive(&mut value, &["password", "secret", "token", "url"]);
        value
    }

    fn load_layered(config_directory: &Path, environment: &str) -> ConfigResult<BusConfig> {
        let base = config_directory.join("bus");
        let overlay = config_directory.join(format!("bus.{environment}"));

        let config = Config::builder()
            .add_source(File::with_name(&base.to_string_lossy()).required(false))
            .add_source(File::with_name(&overlay.to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix("BUS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        config.try_deserialize::<BusConfig>().map_err(Into::into)
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive && val.is_string() {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}
