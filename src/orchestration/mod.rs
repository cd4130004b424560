//! # Orchestration
//!
//! The moving parts of the bus.
//!
//! ## Core Components
//!
//! - **PriorityEventQueue**: priority/FIFO ordered waiting room with atomic claims
//!   and backoff-delayed retries
//! - **Dispatcher**: single coordination loop: resolve, transform, deliver, log,
//!   then finish or requeue
//! - **HealthMonitor**: periodic liveness probes feeding the module registry
//! - **IntegrationBus**: facade tying the above to storage and configuration
//!
//! Shared state moves between them as explicit `Arc` handles in [`BusComponents`].

pub mod backoff;
pub mod bus;
pub mod dispatcher;
pub mod health_monitor;
pub mod queue;
pub mod tracker;

pub use backoff::BackoffPolicy;
pub use bus::{BusHandle, CancelOutcome, IntegrationBus};
pub use dispatcher::{BusComponents, Dispatcher, DispatcherStats, DispatcherStatsSnapshot};
pub use health_monitor::HealthMonitor;
pub use queue::{PriorityEventQueue, QueueCancel, RequeueOutcome};
pub use tracker::EnvelopeTracker;
