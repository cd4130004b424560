//! # Registries
//!
//! Shared, read-mostly tables consulted by the dispatcher and health monitor:
//! modules, integration rules, and payload transforms.

pub mod module_registry;
pub mod rule_catalog;
pub mod transform_registry;

pub use module_registry::{HealthPolicy, HealthUpdate, ModuleRegistry};
pub use rule_catalog::RuleCatalog;
pub use transform_registry::{
    FieldMapTransform, IdentityTransform, OrderToInvoice, PayloadTransform, SaleToKitchenTicket,
    SensorReadingToAlert, TransformRegistry,
};
