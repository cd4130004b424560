//! # Bus Lifecycle Events
//!
//! Broadcast notifications about envelopes and module health for in-process
//! observers (tests, dashboards, bridges). Publishing never blocks dispatch and
//! succeeds whether or not anyone is listening.

pub mod publisher;

pub use publisher::{BusEvent, EventPublisher};
