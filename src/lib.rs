#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Integration Bus
//!
//! Module-integration event bus for independently deployed business modules
//! (point of sale, kitchen, finance, reservations, sensors, ...).
//!
//! ## Overview
//!
//! Modules publish state changes as events. The bus wraps each one in an envelope,
//! orders it by priority, resolves which modules care about it through integration
//! rules, converts the payload into each target's shape, and delivers it with
//! bounded, exponentially backed-off retries. Every attempt lands in an
//! append-only sync log, and a health monitor keeps unreachable modules out of
//! the delivery path.
//!
//! ## Key Features
//!
//! - **Decoupled ingress**: `publish` succeeds regardless of downstream availability
//! - **Priority dispatch**: CRITICAL > HIGH > MEDIUM > LOW, FIFO within a priority
//! - **Partial-failure isolation**: one target failing never blocks the others
//! - **Remainder-only retry**: retries revisit only targets still owed a delivery
//! - **Durable state**: registry, rules, sync log and envelope journal survive restarts
//!
//! ## Module Organization
//!
//! - [`models`] - Modules, envelopes, rules, sync log entries
//! - [`state_machine`] - Envelope delivery state machine
//! - [`registry`] - Module registry, rule catalog, transform registry
//! - [`orchestration`] - Priority queue, dispatcher, health monitor, bus facade
//! - [`delivery`] - HTTP and sandbox delivery clients
//! - [`audit`] - Sync log and abandonment records
//! - [`storage`] - Memory, file and PostgreSQL persistence
//! - [`events`] - Lifecycle event broadcasting
//! - [`config`] - Layered YAML/environment configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integration_bus::config::ConfigManager;
//! use integration_bus::IntegrationBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let bus = IntegrationBus::bootstrap(manager.config().clone()).await?;
//! let handle = bus.start();
//!
//! // ... modules publish through `bus.publish(..)` ...
//!
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod constants;
pub mod delivery;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;
pub mod storage;

pub use audit::SyncLog;
pub use config::{BusConfig, ConfigManager};
pub use delivery::{DeliveryClient, HttpDeliveryClient, SandboxDeliveryClient};
pub use error::{BusError, DeliveryError, Result, TransformError};
pub use events::{BusEvent, EventPublisher};
pub use models::{
    AuditQuery, EventEnvelope, EventType, IntegrationRule, Module, ModuleDescriptor,
    ModuleStatus, Priority, RuleTarget, SyncLogEntry,
};
pub use orchestration::{BusHandle, CancelOutcome, IntegrationBus};
pub use state_machine::DeliveryState;
pub use storage::BusStore;
