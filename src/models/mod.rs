pub mod envelope;
pub mod event_type;
pub mod health;
pub mod module;
pub mod rule;
pub mod sync_log;

// Re-export core models for easy access
pub use envelope::{EnvelopeId, EventEnvelope, RouteTarget, TargetOutcome, TargetStatus};
pub use event_type::{EventType, Priority};
pub use health::{HealthSnapshot, ProbeResult};
pub use module::{Module, ModuleDescriptor, ModuleId, ModuleStatus};
pub use rule::{IntegrationRule, RuleTarget};
pub use sync_log::{
    AbandonmentRecord, AuditQuery, FailureKind, Severity, SyncLogEntry, SyncOutcome,
};
