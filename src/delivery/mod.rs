//! # Delivery
//!
//! Hands transformed payloads to target modules and answers liveness probes.
//!
//! The dispatcher bounds every `deliver` call with the configured delivery
//! timeout, and the health monitor bounds `probe` with the probe timeout, so
//! implementations do not have to enforce either themselves.

pub mod http;
pub mod sandbox;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DeliveryConfig, DeliveryMode};
use crate::error::{DeliveryError, Result};
use crate::models::{EnvelopeId, EventType, Module, ModuleId, ProbeResult};

pub use http::HttpDeliveryClient;
pub use sandbox::{RecordedDelivery, SandboxDeliveryClient, SandboxResponse};

/// One transformed payload bound for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub envelope_id: EnvelopeId,
    pub source_id: ModuleId,
    pub event_type: EventType,
    pub rule_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub target_id: ModuleId,
    /// Transport status code, when the transport has one
    pub status: Option<u16>,
    pub latency: Duration,
}

#[async_trait]
pub trait DeliveryClient: Send + Sync + std::fmt::Debug {
    async fn deliver(
        &self,
        target: &Module,
        request: &DeliveryRequest,
    ) -> std::result::Result<DeliveryReceipt, DeliveryError>;

    /// Single liveness check. Never fails; an error is an unreachable result.
    async fn probe(&self, target: &Module) -> ProbeResult;
}

/// Build the client selected by configuration
pub fn create_delivery_client(config: &DeliveryConfig) -> Result<Arc<dyn DeliveryClient>> {
    Ok(match config.mode {
        DeliveryMode::Http => Arc::new(HttpDeliveryClient::new(config)?),
        DeliveryMode::Sandbox => Arc::new(SandboxDeliveryClient::new()),
    })
}
