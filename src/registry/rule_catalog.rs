//! # Rule Catalog
//!
//! Maps (source module, event type) to the ordered targets that care about it.
//! Edits replace whole rules under the write lock, so resolution always sees a
//! rule either entirely before or entirely after an edit.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{BusError, Result};
use crate::models::{EventType, IntegrationRule, ModuleId, RouteTarget};
use crate::storage::BusStore;

type ResolutionKey = (ModuleId, EventType);

#[derive(Debug, Default)]
struct CatalogState {
    rules: HashMap<String, IntegrationRule>,
    /// Rule ids per (source, event type), enabled or not
    index: HashMap<ResolutionKey, Vec<String>>,
    next_sequence: u64,
}

impl CatalogState {
    fn index_rule(&mut self, rule: &IntegrationRule) {
        for event_type in &rule.event_types {
            let ids = self
                .index
                .entry((rule.source_id.clone(), event_type.clone()))
                .or_default();
            if !ids.contains(&rule.id) {
                ids.push(rule.id.clone());
            }
        }
    }

    fn unindex_rule(&mut self, rule: &IntegrationRule) {
        for event_type in &rule.event_types {
            let key = (rule.source_id.clone(), event_type.clone());
            if let Some(ids) = self.index.get_mut(&key) {
                ids.retain(|id| id != &rule.id);
                if ids.is_empty() {
                    self.index.remove(&key);
                }
            }
        }
    }

    fn insert(&mut self, mut rule: IntegrationRule) -> IntegrationRule {
        match self.rules.get(&rule.id) {
            // Edits keep their original registration position
            Some(existing) => {
                rule.sequence = existing.sequence;
                let existing = existing.clone();
                self.unindex_rule(&existing);
            }
            None => {
                self.next_sequence += 1;
                rule.sequence = self.next_sequence;
            }
        }
        rule.updated_at = Utc::now();
        self.index_rule(&rule);
        self.rules.insert(rule.id.clone(), rule.clone());
        rule
    }
}

pub struct RuleCatalog {
    state: RwLock<CatalogState>,
    write_gate: Mutex<()>,
    store: Arc<dyn BusStore>,
}

impl std::fmt::Debug for RuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCatalog")
            .field("rules", &self.state.read().rules.len())
            .finish()
    }
}

impl RuleCatalog {
    pub fn new(store: Arc<dyn BusStore>) -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            write_gate: Mutex::new(()),
            store,
        }
    }

    /// Load persisted rules, keeping their registration order
    pub async fn restore(&self) -> Result<usize> {
        let _gate = self.write_gate.lock().await;
        let mut rules = self.store.load_rules().await?;
        rules.sort_by_key(|rule| rule.sequence);

        let mut state = self.state.write();
        for rule in rules {
            state.next_sequence = state.next_sequence.max(rule.sequence);
            if let Some(existing) = state.rules.get(&rule.id).cloned() {
                state.unindex_rule(&existing);
            }
            state.index_rule(&rule);
            state.rules.insert(rule.id.clone(), rule);
        }
        Ok(state.rules.len())
    }

    /// Add a new rule. Rejects ids that already exist.
    pub async fn add_rule(&self, rule: IntegrationRule) -> Result<IntegrationRule> {
        rule.validate()?;
        if self.state.read().rules.contains_key(&rule.id) {
            return Err(BusError::ValidationError(format!(
                "rule '{}' already exists",
                rule.id
            )));
        }
        self.upsert_rule(rule).await
    }

    /// Insert or atomically replace a rule
    pub async fn upsert_rule(&self, rule: IntegrationRule) -> Result<IntegrationRule> {
        rule.validate()?;
        let _gate = self.write_gate.lock().await;
        let stored = self.state.write().insert(rule);
        self.store.save_rule(&stored).await?;

        info!(
            rule_id = %stored.id,
            source_id = %stored.source_id,
            targets = stored.targets.len(),
            enabled = stored.enabled,
            priority_weight = stored.priority_weight,
            "Rule saved"
        );
        Ok(stored)
    }

    /// Enable or disable a rule. History referencing it is untouched.
    pub async fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<IntegrationRule> {
        let _gate = self.write_gate.lock().await;
        let rule = {
            let mut state = self.state.write();
            let rule = state
                .rules
                .get_mut(rule_id)
                .ok_or_else(|| BusError::not_found("rule", rule_id))?;
            rule.enabled = enabled;
            rule.updated_at = Utc::now();
            rule.clone()
        };
        self.store.save_rule(&rule).await?;

        info!(rule_id = %rule_id, enabled = enabled, "Rule toggled");
        Ok(rule)
    }

    pub fn get(&self, rule_id: &str) -> Result<IntegrationRule> {
        self.state
            .read()
            .rules
            .get(rule_id)
            .cloned()
            .ok_or_else(|| BusError::not_found("rule", rule_id))
    }

    /// All rules in registration order
    pub fn list(&self) -> Vec<IntegrationRule> {
        let mut rules: Vec<_> = self.state.read().rules.values().cloned().collect();
        rules.sort_by_key(|rule| rule.sequence);
        rules
    }

    /// Resolve the ordered, target-deduplicated routes for an event.
    ///
    /// Rules are merged by descending priority weight, then registration order;
    /// the first route to a target wins.
    pub fn resolve(&self, source_id: &str, event_type: &EventType) -> Vec<RouteTarget> {
        let mut matching: Vec<IntegrationRule> = {
            let state = self.state.read();
            state
                .index
                .get(&(source_id.to_string(), event_type.clone()))
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.rules.get(id))
                        .filter(|rule| rule.matches(source_id, event_type))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        matching.sort_by(|a, b| {
            b.priority_weight
                .cmp(&a.priority_weight)
                .then(a.sequence.cmp(&b.sequence))
        });

        let mut seen = HashSet::new();
        let routes: Vec<RouteTarget> = matching
            .iter()
            .flat_map(|rule| {
                rule.targets
                    .iter()
                    .map(move |target| RouteTarget::new(&rule.id, &target.target_id, &target.transform))
            })
            .filter(|route| seen.insert(route.target_id.clone()))
            .collect();

        debug!(
            source_id = %source_id,
            event_type = %event_type,
            rules = matching.len(),
            routes = routes.len(),
            "Resolved routes"
        );
        routes
    }
}
