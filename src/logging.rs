//! # Structured Logging Module
//!
//! Environment-aware structured logging for the bus. Console output by default,
//! JSON lines when `BUS_LOG_FORMAT=json` (for log shippers). `RUST_LOG` overrides
//! the environment-derived level.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = std::env::var("BUS_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A host application may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            environment = %environment,
            json = json,
            "STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("BUS_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for envelope lifecycle operations
pub fn log_envelope_operation(
    operation: &str,
    envelope_id: Uuid,
    source_id: &str,
    event_type: &str,
    state: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        envelope_id = %envelope_id,
        source_id = %source_id,
        event_type = %event_type,
        state = %state,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "ENVELOPE_OPERATION"
    );
}

/// Log structured data for a single delivery attempt
pub fn log_delivery_attempt(
    envelope_id: Uuid,
    rule_id: &str,
    target_id: &str,
    attempt: u32,
    outcome: &str,
    latency_ms: u64,
    error: Option<&str>,
) {
    if error.is_some() {
        tracing::warn!(
            envelope_id = %envelope_id,
            rule_id = %rule_id,
            target_id = %target_id,
            attempt = attempt,
            outcome = %outcome,
            latency_ms = latency_ms,
            error = error,
            "DELIVERY_ATTEMPT"
        );
    } else {
        tracing::info!(
            envelope_id = %envelope_id,
            rule_id = %rule_id,
            target_id = %target_id,
            attempt = attempt,
            outcome = %outcome,
            latency_ms = latency_ms,
            "DELIVERY_ATTEMPT"
        );
    }
}

/// Log structured data for registry operations
pub fn log_registry_operation(operation: &str, module_id: &str, status: &str, details: Option<&str>) {
    tracing::info!(
        operation = %operation,
        module_id = %module_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "REGISTRY_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
    }
}
