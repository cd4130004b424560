//! # System Constants
//!
//! Defaults and operational boundaries of the integration bus. Configuration
//! values fall back to these when a section or field is omitted.

use std::time::Duration;

/// Dispatcher and retry defaults
pub mod dispatch {
    use super::Duration;

    /// Retries after the first attempt; a default envelope gets three attempts.
    pub const DEFAULT_MAX_RETRIES: u32 = 2;
    pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(1_000);
    pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(60_000);
    /// Finished envelopes kept in memory for lookups before the oldest are evicted
    pub const DEFAULT_COMPLETED_RETENTION: usize = 10_000;
}

/// Delivery client defaults
pub mod delivery {
    use super::Duration;

    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_DELIVERY_PATH: &str = "/events";
    pub const DEFAULT_PROBE_PATH: &str = "/health";

    pub const HEADER_ENVELOPE_ID: &str = "x-envelope-id";
    pub const HEADER_EVENT_TYPE: &str = "x-event-type";
    pub const HEADER_SOURCE_MODULE: &str = "x-source-module";
}

/// Health monitoring defaults
pub mod health {
    use super::Duration;

    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
    /// Consecutive failed probes before a module is taken offline
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
    /// Weight of the newest probe in the exponential moving average
    pub const DEFAULT_SMOOTHING_FACTOR: f64 = 0.3;
    pub const DEFAULT_HISTORY_SIZE: usize = 20;
    /// Score assigned to a freshly registered module
    pub const INITIAL_HEALTH_SCORE: f64 = 1.0;
}

/// Ingress limits
pub mod ingress {
    pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
}

/// Lifecycle event channel
pub mod events {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
}

/// Well-known transform names shipped with the bus
pub mod transforms {
    pub const IDENTITY: &str = "identity";
    pub const SALE_TO_KITCHEN_TICKET: &str = "sale_to_kitchen_ticket";
    pub const ORDER_TO_INVOICE: &str = "order_to_invoice";
    pub const SENSOR_READING_TO_ALERT: &str = "sensor_reading_to_alert";
}

/// Default path of the configuration directory relative to the working directory
pub const DEFAULT_CONFIG_DIRECTORY: &str = "config";

/// How long `shutdown` waits for the background loops before giving up
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(15);
