//! # Sync Log Entries
//!
//! Append-only records of every dispatch attempt, plus the abandonment records
//! raised when an envelope stops being retried.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::envelope::{EnvelopeId, RouteTarget};
use super::event_type::EventType;
use super::module::ModuleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Failure,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Why a single attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transform,
    Delivery,
    Timeout,
    TargetOffline,
    UnknownTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: Uuid,
    pub rule_id: String,
    pub source_id: ModuleId,
    pub target_id: ModuleId,
    pub envelope_id: EnvelopeId,
    pub event_type: EventType,
    pub outcome: SyncOutcome,
    pub failure_kind: Option<FailureKind>,
    pub error: Option<String>,
    /// 1-based attempt round that produced this entry
    pub attempt: u32,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl SyncLogEntry {
    pub fn success(
        envelope_id: EnvelopeId,
        source_id: &str,
        event_type: &EventType,
        route: &RouteTarget,
        attempt: u32,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: route.rule_id.clone(),
            source_id: source_id.to_string(),
            target_id: route.target_id.clone(),
            envelope_id,
            event_type: event_type.clone(),
            outcome: SyncOutcome::Success,
            failure_kind: None,
            error: None,
            attempt,
            latency_ms,
            timestamp: Utc::now(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn failure(
        envelope_id: EnvelopeId,
        source_id: &str,
        event_type: &EventType,
        route: &RouteTarget,
        attempt: u32,
        latency_ms: u64,
        kind: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: route.rule_id.clone(),
            source_id: source_id.to_string(),
            target_id: route.target_id.clone(),
            envelope_id,
            event_type: event_type.clone(),
            outcome: SyncOutcome::Failure,
            failure_kind: Some(kind),
            error: Some(error.into()),
            attempt,
            latency_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn involves(&self, module_id: &str) -> bool {
        self.source_id == module_id || self.target_id == module_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Critical,
}

/// Raised once when an envelope stops being retried with targets still owed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbandonmentRecord {
    pub id: Uuid,
    pub envelope_id: EnvelopeId,
    pub source_id: ModuleId,
    pub event_type: EventType,
    pub undelivered_targets: Vec<ModuleId>,
    pub retry_count: u32,
    pub reason: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Read-only filter over the sync log. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Matches entries where the module is either source or target
    pub module_id: Option<ModuleId>,
    pub outcome: Option<SyncOutcome>,
    pub envelope_id: Option<EnvelopeId>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn for_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }

    pub fn with_outcome(mut self, outcome: SyncOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn for_envelope(mut self, envelope_id: EnvelopeId) -> Self {
        self.envelope_id = Some(envelope_id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &SyncLogEntry) -> bool {
        if self.from.is_some_and(|from| entry.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.timestamp > to) {
            return false;
        }
        if let Some(module_id) = &self.module_id {
            if !entry.involves(module_id) {
                return false;
            }
        }
        if self.outcome.is_some_and(|outcome| entry.outcome != outcome) {
            return false;
        }
        if self
            .envelope_id
            .is_some_and(|envelope_id| entry.envelope_id != envelope_id)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(outcome: SyncOutcome) -> SyncLogEntry {
        let route = RouteTarget::new("pos-kitchen", "kitchen", "identity");
        match outcome {
            SyncOutcome::Success => {
                SyncLogEntry::success(Uuid::new_v4(), "pos", &EventType::SaleCompleted, &route, 1, 12)
            }
            SyncOutcome::Failure => SyncLogEntry::failure(
                Uuid::new_v4(),
                "pos",
                &EventType::SaleCompleted,
                &route,
                1,
                12,
                FailureKind::Delivery,
                "connection refused",
            ),
        }
    }

    #[test]
    fn test_query_filters() {
        let success = entry(SyncOutcome::Success);
        let failure = entry(SyncOutcome::Failure);

        let query = AuditQuery::new().with_outcome(SyncOutcome::Failure);
        assert!(!query.matches(&success));
        assert!(query.matches(&failure));

        assert!(AuditQuery::new().for_module("kitchen").matches(&success));
        assert!(AuditQuery::new().for_module("pos").matches(&success));
        assert!(!AuditQuery::new().for_module("finance").matches(&success));

        assert!(AuditQuery::new()
            .for_envelope(success.envelope_id)
            .matches(&success));
        assert!(!AuditQuery::new()
            .for_envelope(success.envelope_id)
            .matches(&failure));
    }

    #[test]
    fn test_query_time_range() {
        let e = entry(SyncOutcome::Success);
        let window = AuditQuery::new().between(
            e.timestamp - Duration::seconds(5),
            e.timestamp + Duration::seconds(5),
        );
        assert!(window.matches(&e));

        let later = AuditQuery::new().between(
            e.timestamp + Duration::seconds(1),
            e.timestamp + Duration::seconds(10),
        );
        assert!(!later.matches(&e));
    }
}
