use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{DeliveryClient, DeliveryReceipt, DeliveryRequest};
use crate::config::DeliveryConfig;
use crate::constants::delivery::{HEADER_ENVELOPE_ID, HEADER_EVENT_TYPE, HEADER_SOURCE_MODULE};
use crate::error::{BusError, DeliveryError, Result};
use crate::models::{Module, ProbeResult};

/// Delivers payloads as JSON `POST`s to `{address}{delivery_path}` and probes
/// with `GET {address}{probe_path}`.
#[derive(Debug, Clone)]
pub struct HttpDeliveryClient {
    client: Client,
    timeout: Duration,
    delivery_path: String,
    probe_path: String,
}

impl HttpDeliveryClient {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(format!("integration-bus/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BusError::ConfigurationError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout: config.timeout(),
            delivery_path: config.delivery_path.clone(),
            probe_path: config.probe_path.clone(),
        })
    }

    fn endpoint(&self, target: &Module, path: &str) -> std::result::Result<Url, DeliveryError> {
        let raw = format!("{}{}", target.address.trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|_| DeliveryError::InvalidAddress {
            module_id: target.id.clone(),
            address: target.address.clone(),
        })
    }

    fn classify(&self, target: &Module, error: reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            DeliveryError::Timeout {
                module_id: target.id.clone(),
                timeout: self.timeout,
            }
        } else {
            DeliveryError::Connection {
                module_id: target.id.clone(),
                reason: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn deliver(
        &self,
        target: &Module,
        request: &DeliveryRequest,
    ) -> std::result::Result<DeliveryReceipt, DeliveryError> {
        let url = self.endpoint(target, &self.delivery_path)?;
        let started = Instant::now();

        let response = self
            .client
            .post(url)
            .header(HEADER_ENVELOPE_ID, request.envelope_id.to_string())
            .header(HEADER_EVENT_TYPE, request.event_type.as_str())
            .header(HEADER_SOURCE_MODULE, request.source_id.as_str())
            .json(&request.payload)
            .send()
            .await
            .map_err(|e| self.classify(target, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                module_id: target.id.clone(),
                status: status.as_u16(),
            });
        }

        debug!(
            target_id = %target.id,
            envelope_id = %request.envelope_id,
            status = status.as_u16(),
            "Delivered over HTTP"
        );
        Ok(DeliveryReceipt {
            target_id: target.id.clone(),
            status: Some(status.as_u16()),
            latency: started.elapsed(),
        })
    }

    async fn probe(&self, target: &Module) -> ProbeResult {
        let started = Instant::now();
        let url = match self.endpoint(target, &self.probe_path) {
            Ok(url) => url,
            Err(_) => return ProbeResult::unreachable(started.elapsed()),
        };

        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                ProbeResult::reachable(started.elapsed())
            }
            Ok(response) => {
                debug!(target_id = %target.id, status = response.status().as_u16(), "Probe rejected");
                ProbeResult::unreachable(started.elapsed())
            }
            Err(e) => {
                debug!(target_id = %target.id, error = %e, "Probe failed");
                ProbeResult::unreachable(started.elapsed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, ModuleDescriptor};
    use serde_json::json;

    fn module(address: &str) -> Module {
        Module::from_descriptor(ModuleDescriptor::new("kitchen", "Kitchen", address))
    }

    #[test]
    fn test_endpoint_joins_path() {
        let client = HttpDeliveryClient::new(&DeliveryConfig::default()).unwrap();
        let url = client
            .endpoint(&module("http://kitchen.local:8080/"), "/events")
            .unwrap();
        assert_eq!(url.as_str(), "http://kitchen.local:8080/events");
    }

    #[tokio::test]
    async fn test_invalid_address_is_reported() {
        let client = HttpDeliveryClient::new(&DeliveryConfig::default()).unwrap();
        let request = DeliveryRequest {
            envelope_id: uuid::Uuid::new_v4(),
            source_id: "pos".to_string(),
            event_type: EventType::SaleCompleted,
            rule_id: "r".to_string(),
            payload: json!({}),
        };
        let err = client
            .deliver(&module("not a url"), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidAddress { .. }));
        assert_eq!(err.module_id(), "kitchen");
    }

    #[tokio::test]
    async fn test_probe_of_invalid_address_is_unreachable() {
        let client = HttpDeliveryClient::new(&DeliveryConfig::default()).unwrap();
        assert!(!client.probe(&module("::::")).await.reachable);
    }
}
