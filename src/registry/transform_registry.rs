//! # Transform Registry
//!
//! Named, deterministic payload converters between module schemas. A transform
//! failure is scoped to the single (rule, target) pair that asked for it.

use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{FieldMapping, TransformDefinition};
use crate::constants::transforms as names;
use crate::error::{BusError, Result, TransformError};

/// A stateless payload converter
pub trait PayloadTransform: Send + Sync {
    fn name(&self) -> &str;

    /// Convert `payload`. Must return the same output for the same input.
    fn apply(&self, payload: &Value) -> std::result::Result<Value, TransformError>;
}

pub struct TransformRegistry {
    transforms: RwLock<HashMap<String, Arc<dyn PayloadTransform>>>,
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.names())
            .finish()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TransformRegistry {
    pub fn empty() -> Self {
        Self {
            transforms: RwLock::new(HashMap::new()),
        }
    }

    /// Registry preloaded with the platform transforms
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        registry.register(Arc::new(IdentityTransform));
        registry.register(Arc::new(SaleToKitchenTicket));
        registry.register(Arc::new(OrderToInvoice));
        registry.register(Arc::new(SensorReadingToAlert));
        registry
    }

    /// Register (or replace) a transform under its name
    pub fn register(&self, transform: Arc<dyn PayloadTransform>) {
        self.transforms
            .write()
            .insert(transform.name().to_string(), transform);
    }

    /// Register a configuration-defined field mapping
    pub fn register_definition(&self, definition: &TransformDefinition) -> Result<()> {
        if definition.name.trim().is_empty() {
            return Err(BusError::ValidationError(
                "transform name must not be empty".to_string(),
            ));
        }
        self.register(Arc::new(FieldMapTransform::from(definition.clone())));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transforms.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn apply(&self, name: &str, payload: &Value) -> std::result::Result<Value, TransformError> {
        // Clone the handle so the lock is not held while the transform runs
        let transform = self
            .transforms
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TransformError::UnknownTransform(name.to_string()))?;
        transform.apply(payload)
    }
}

fn expect_object<'a>(
    transform: &str,
    payload: &'a Value,
) -> std::result::Result<&'a Map<String, Value>, TransformError> {
    payload
        .as_object()
        .ok_or_else(|| TransformError::malformed(transform, "payload must be a JSON object"))
}

fn required_number(
    transform: &str,
    object: &Map<String, Value>,
    field: &str,
) -> std::result::Result<f64, TransformError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(TransformError::missing(transform, field)),
        Some(value) => value.as_f64().ok_or_else(|| {
            TransformError::malformed(transform, format!("'{field}' must be a number"))
        }),
    }
}

/// Walk a dotted path (`customer.address.city`) into a JSON value
fn lookup_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(payload, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        })
        .filter(|value| !value.is_null())
}

/// Passes the payload through unchanged
pub struct IdentityTransform;

impl PayloadTransform for IdentityTransform {
    fn name(&self) -> &str {
        names::IDENTITY
    }

    fn apply(&self, payload: &Value) -> std::result::Result<Value, TransformError> {
        Ok(payload.clone())
    }
}

/// Point-of-sale sale → kitchen preparation ticket
pub struct SaleToKitchenTicket;

impl PayloadTransform for SaleToKitchenTicket {
    fn name(&self) -> &str {
        names::SALE_TO_KITCHEN_TICKET
    }

    fn apply(&self, payload: &Value) -> std::result::Result<Value, TransformError> {
        let sale = expect_object(self.name(), payload)?;
        let total = required_number(self.name(), sale, "total")?;

        let items = match sale.get("items") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    let name = item
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| TransformError::missing(self.name(), "items[].name"))?;
                    let quantity = item.get("quantity").and_then(Value::as_u64).unwrap_or(1);
                    Ok(json!({ "dish": name, "quantity": quantity }))
                })
                .collect::<std::result::Result<Vec<_>, TransformError>>()?,
            Some(_) => {
                return Err(TransformError::malformed(self.name(), "'items' must be an array"))
            }
        };

        Ok(json!({
            "ticket_type": "kitchen_order",
            "sale_reference": sale.get("sale_id").cloned().unwrap_or(Value::Null),
            "table": sale.get("table").cloned().unwrap_or(Value::Null),
            "items": items,
            "order_total": total,
        }))
    }
}

/// Order → finance invoice draft
pub struct OrderToInvoice;

impl PayloadTransform for OrderToInvoice {
    fn name(&self) -> &str {
        names::ORDER_TO_INVOICE
    }

    fn apply(&self, payload: &Value) -> std::result::Result<Value, TransformError> {
        let order = expect_object(self.name(), payload)?;
        let order_id = order
            .get("order_id")
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| TransformError::missing(self.name(), "order_id"))?;
        let amount = required_number(self.name(), order, "amount")?;
        let currency = order
            .get("currency")
            .and_then(Value::as_str)
            .unwrap_or("USD");

        Ok(json!({
            "invoice_for_order": order_id,
            "customer": order.get("customer").cloned().unwrap_or(Value::Null),
            "amount_due": amount,
            "currency": currency,
            "status": "draft",
        }))
    }
}

/// Sensor reading → alert, with severity by threshold breach
pub struct SensorReadingToAlert;

impl PayloadTransform for SensorReadingToAlert {
    fn name(&self) -> &str {
        names::SENSOR_READING_TO_ALERT
    }

    fn apply(&self, payload: &Value) -> std::result::Result<Value, TransformError> {
        let reading = expect_object(self.name(), payload)?;
        let sensor_id = reading
            .get("sensor_id")
            .and_then(Value::as_str)
            .ok_or_else(|| TransformError::missing(self.name(), "sensor_id"))?;
        let value = required_number(self.name(), reading, "value")?;
        let threshold = required_number(self.name(), reading, "threshold")?;

        let severity = if value >= threshold * 1.5 {
            "critical"
        } else if value >= threshold {
            "warning"
        } else {
            "normal"
        };

        Ok(json!({
            "sensor_id": sensor_id,
            "reading": value,
            "threshold": threshold,
            "severity": severity,
            "unit": reading.get("unit").cloned().unwrap_or(Value::Null),
        }))
    }
}

/// Declarative field mapping defined in configuration
pub struct FieldMapTransform {
    name: String,
    fields: Vec<FieldMapping>,
    constants: Map<String, Value>,
}

impl From<TransformDefinition> for FieldMapTransform {
    fn from(definition: TransformDefinition) -> Self {
        Self {
            name: definition.name,
            fields: definition.fields,
            constants: definition.constants,
        }
    }
}

impl PayloadTransform for FieldMapTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, payload: &Value) -> std::result::Result<Value, TransformError> {
        expect_object(&self.name, payload)?;

        let mut output = self.constants.clone();
        for mapping in &self.fields {
            match lookup_path(payload, &mapping.from) {
                Some(value) => {
                    output.insert(mapping.to.clone(), value.clone());
                }
                None if mapping.required => {
                    return Err(TransformError::missing(&self.name, mapping.from.clone()))
                }
                None => {}
            }
        }
        Ok(Value::Object(output))
    }
}
