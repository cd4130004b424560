//! Error types for the integration bus.
//!
//! `BusError` is the crate-wide error. Per-attempt failures (`TransformError`,
//! `DeliveryError`) have their own enums because the dispatcher converts them into
//! sync log outcomes instead of propagating them.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Unknown module: {0}")]
    UnknownModule(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("Envelope {envelope_id} exhausted its retry budget ({max_retries} retries)")]
    ExhaustedRetries { envelope_id: Uuid, max_retries: u32 },
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Invalid state transition for envelope {envelope_id}: {from} -> {event}")]
    InvalidStateTransition {
        envelope_id: Uuid,
        from: String,
        event: String,
    },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BusError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        BusError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Errors that mean the bus's own bookkeeping is corrupt. These are the only
    /// errors allowed to stop the dispatcher loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BusError::InvalidStateTransition { .. } | BusError::Internal(_)
        )
    }
}

impl From<serde_json::Error> for BusError {
    fn from(error: serde_json::Error) -> Self {
        BusError::StorageError(format!("JSON serialization error: {error}"))
    }
}

impl From<std::io::Error> for BusError {
    fn from(error: std::io::Error) -> Self {
        BusError::StorageError(format!("I/O error: {error}"))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for BusError {
    fn from(err: sqlx::Error) -> Self {
        BusError::StorageError(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::migrate::MigrateError> for BusError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        BusError::StorageError(format!("Migration failed: {err}"))
    }
}

impl From<ConfigurationError> for BusError {
    fn from(err: ConfigurationError) -> Self {
        BusError::ConfigurationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Failure applying a named transform to one (rule, target) pair.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("Unknown transform: {0}")]
    UnknownTransform(String),
    #[error("Transform {transform} rejected payload: {reason}")]
    MalformedInput { transform: String, reason: String },
    #[error("Transform {transform} is missing required field '{field}'")]
    MissingField { transform: String, field: String },
}

impl TransformError {
    pub fn malformed(transform: &str, reason: impl Into<String>) -> Self {
        TransformError::MalformedInput {
            transform: transform.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing(transform: &str, field: impl Into<String>) -> Self {
        TransformError::MissingField {
            transform: transform.to_string(),
            field: field.into(),
        }
    }
}

/// Failure handing a payload to a target module.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeliveryError {
    #[error("Delivery to {module_id} timed out after {}ms", .timeout.as_millis())]
    Timeout { module_id: String, timeout: Duration },
    #[error("Connection to {module_id} failed: {reason}")]
    Connection { module_id: String, reason: String },
    #[error("Module {module_id} rejected delivery with status {status}")]
    Rejected { module_id: String, status: u16 },
    #[error("Module {module_id} is offline")]
    TargetOffline { module_id: String },
    #[error("Invalid delivery address for {module_id}: {address}")]
    InvalidAddress { module_id: String, address: String },
}

impl DeliveryError {
    pub fn module_id(&self) -> &str {
        match self {
            DeliveryError::Timeout { module_id, .. }
            | DeliveryError::Connection { module_id, .. }
            | DeliveryError::Rejected { module_id, .. }
            | DeliveryError::TargetOffline { module_id }
            | DeliveryError::InvalidAddress { module_id, .. } => module_id,
        }
    }
}
