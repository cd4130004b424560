//! Event types and priorities carried by envelopes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tagged event type. Well-known platform events get their own variant; anything
/// else a module emits travels as `Other` with its dotted wire name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EventType {
    SaleCompleted,
    SaleRefunded,
    OrderCreated,
    OrderUpdated,
    OrderCancelled,
    ReservationCreated,
    ReservationCancelled,
    InvoiceIssued,
    PaymentReceived,
    InventoryLow,
    SensorReading,
    SensorAlert,
    Other(String),
}

impl EventType {
    /// Parse a wire name, normalizing well-known names to their variant
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim();
        match name {
            "sale.completed" => Self::SaleCompleted,
            "sale.refunded" => Self::SaleRefunded,
            "order.created" => Self::OrderCreated,
            "order.updated" => Self::OrderUpdated,
            "order.cancelled" => Self::OrderCancelled,
            "reservation.created" => Self::ReservationCreated,
            "reservation.cancelled" => Self::ReservationCancelled,
            "invoice.issued" => Self::InvoiceIssued,
            "payment.received" => Self::PaymentReceived,
            "inventory.low" => Self::InventoryLow,
            "sensor.reading" => Self::SensorReading,
            "sensor.alert" => Self::SensorAlert,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::SaleCompleted => "sale.completed",
            Self::SaleRefunded => "sale.refunded",
            Self::OrderCreated => "order.created",
            Self::OrderUpdated => "order.updated",
            Self::OrderCancelled => "order.cancelled",
            Self::ReservationCreated => "reservation.created",
            Self::ReservationCancelled => "reservation.cancelled",
            Self::InvoiceIssued => "invoice.issued",
            Self::PaymentReceived => "payment.received",
            Self::InventoryLow => "inventory.low",
            Self::SensorReading => "sensor.reading",
            Self::SensorAlert => "sensor.alert",
            Self::Other(name) => name,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

/// Dispatch priority. Declaration order gives `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(format!("Invalid priority: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_names_normalize_to_variants() {
        assert_eq!(EventType::new("sale.completed"), EventType::SaleCompleted);
        assert_eq!(
            EventType::new("kitchen.ticket_printed"),
            EventType::Other("kitchen.ticket_printed".to_string())
        );
        assert_eq!(EventType::SensorAlert.to_string(), "sensor.alert");
    }

    #[test]
    fn test_event_type_serializes_as_wire_name() {
        let json = serde_json::to_string(&EventType::OrderCreated).unwrap();
        assert_eq!(json, "\"order.created\"");
        let parsed: EventType = serde_json::from_str("\"reservation.created\"").unwrap();
        assert_eq!(parsed, EventType::ReservationCreated);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
