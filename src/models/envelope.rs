//! # Event Envelope
//!
//! The canonical unit of a published fact moving through the bus. Created by
//! `publish`, mutated only by the dispatcher, retained after completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::event_type::{EventType, Priority};
use super::module::ModuleId;
use crate::state_machine::DeliveryState;

pub type EnvelopeId = Uuid;

/// One resolved (rule, target, transform) route
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteTarget {
    pub rule_id: String,
    pub target_id: ModuleId,
    pub transform: String,
}

impl RouteTarget {
    pub fn new(
        rule_id: impl Into<String>,
        target_id: impl Into<String>,
        transform: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            target_id: target_id.into(),
            transform: transform.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pending,
    Delivered,
    Failed,
}

/// Latest outcome for one target of an envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub rule_id: String,
    pub target_id: ModuleId,
    pub transform: String,
    pub status: TargetStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TargetOutcome {
    pub fn delivered(route: &RouteTarget, attempts: u32) -> Self {
        Self::from_route(route, TargetStatus::Delivered, attempts, None)
    }

    pub fn failed(route: &RouteTarget, attempts: u32, error: impl Into<String>) -> Self {
        Self::from_route(route, TargetStatus::Failed, attempts, Some(error.into()))
    }

    fn from_route(
        route: &RouteTarget,
        status: TargetStatus,
        attempts: u32,
        last_error: Option<String>,
    ) -> Self {
        Self {
            rule_id: route.rule_id.clone(),
            target_id: route.target_id.clone(),
            transform: route.transform.clone(),
            status,
            attempts,
            last_error,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EnvelopeId,
    pub source_id: ModuleId,
    pub event_type: EventType,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Opaque payload as published; transforms never mutate it
    pub payload: Value,
    pub state: DeliveryState,
    /// Route snapshot taken at first dispatch. `None` until resolved.
    pub routes: Option<Vec<RouteTarget>>,
    /// Routes still owed a successful delivery
    pub pending_routes: Vec<RouteTarget>,
    pub outcomes: Vec<TargetOutcome>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub cancel_requested: bool,
}

impl EventEnvelope {
    pub fn new(
        source_id: impl Into<String>,
        event_type: EventType,
        payload: Value,
        priority: Priority,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            event_type,
            priority,
            created_at: now,
            updated_at: now,
            payload,
            state: DeliveryState::Pending,
            routes: None,
            pending_routes: Vec::new(),
            outcomes: Vec::new(),
            retry_count: 0,
            max_retries,
            cancel_requested: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 1-based number of the attempt round currently running
    pub fn attempt_number(&self) -> u32 {
        self.retry_count + 1
    }

    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn any_delivered(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.status == TargetStatus::Delivered)
    }

    /// Record the outcome for a target, replacing any earlier round's outcome
    pub fn record_outcome(&mut self, outcome: TargetOutcome) {
        match self
            .outcomes
            .iter_mut()
            .find(|existing| existing.target_id == outcome.target_id)
        {
            Some(existing) => *existing = outcome,
            None => self.outcomes.push(outcome),
        }
    }

    pub fn outcome_for(&self, target_id: &str) -> Option<&TargetOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.target_id == target_id)
    }

    /// Targets that have not (yet) been delivered
    pub fn undelivered_targets(&self) -> Vec<ModuleId> {
        self.pending_routes
            .iter()
            .map(|route| route.target_id.clone())
            .collect()
    }

    /// Rewind a journaled envelope that was mid-round when the process stopped
    pub fn reset_for_recovery(&mut self) {
        if self.state == DeliveryState::Processing {
            self.state = if self.routes.is_some() {
                DeliveryState::Failed
            } else {
                DeliveryState::Pending
            };
            self.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_outcome_replaces_previous_round() {
        let mut env = EventEnvelope::new(
            "pos",
            EventType::SaleCompleted,
            json!({"total": 12.5}),
            Priority::High,
            2,
        );
        let route = RouteTarget::new("pos-kitchen", "kitchen", "sale_to_kitchen_ticket");

        env.record_outcome(TargetOutcome::failed(&route, 1, "timeout"));
        assert!(!env.any_delivered());

        env.record_outcome(TargetOutcome::delivered(&route, 2));
        assert_eq!(env.outcomes.len(), 1);
        let outcome = env.outcome_for("kitchen").unwrap();
        assert_eq!(outcome.status, TargetStatus::Delivered);
        assert_eq!(outcome.attempts, 2);
        assert!(env.any_delivered());
    }

    #[test]
    fn test_recovery_rewinds_processing() {
        let mut env = EventEnvelope::new(
            "pos",
            EventType::SaleCompleted,
            json!({}),
            Priority::Low,
            2,
        );
        env.state = DeliveryState::Processing;
        env.reset_for_recovery();
        assert_eq!(env.state, DeliveryState::Pending);

        env.state = DeliveryState::Processing;
        env.routes = Some(vec![RouteTarget::new("r", "kitchen", "identity")]);
        env.reset_for_recovery();
        assert_eq!(env.state, DeliveryState::Failed);
    }
}
