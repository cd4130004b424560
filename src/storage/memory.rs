use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::BusStore;
use crate::error::Result;
use crate::models::{
    AbandonmentRecord, EnvelopeId, EventEnvelope, IntegrationRule, Module, ModuleId,
    SyncLogEntry,
};

#[derive(Debug, Default)]
struct MemoryState {
    modules: HashMap<ModuleId, Module>,
    rules: HashMap<String, IntegrationRule>,
    sync_entries: Vec<SyncLogEntry>,
    abandonments: Vec<AbandonmentRecord>,
    envelopes: HashMap<EnvelopeId, EventEnvelope>,
}

/// Process-local store. Cloning an `Arc` of it shares state, which is how tests
/// simulate a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BusStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn save_module(&self, module: &Module) -> Result<()> {
        self.state
            .write()
            .modules
            .insert(module.id.clone(), module.clone());
        Ok(())
    }

    async fn load_modules(&self) -> Result<Vec<Module>> {
        Ok(self.state.read().modules.values().cloned().collect())
    }

    async fn save_rule(&self, rule: &IntegrationRule) -> Result<()> {
        self.state
            .write()
            .rules
            .insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn load_rules(&self) -> Result<Vec<IntegrationRule>> {
        Ok(self.state.read().rules.values().cloned().collect())
    }

    async fn append_sync_entry(&self, entry: &SyncLogEntry) -> Result<()> {
        self.state.write().sync_entries.push(entry.clone());
        Ok(())
    }

    async fn load_sync_entries(&self) -> Result<Vec<SyncLogEntry>> {
        Ok(self.state.read().sync_entries.clone())
    }

    async fn append_abandonment(&self, record: &AbandonmentRecord) -> Result<()> {
        self.state.write().abandonments.push(record.clone());
        Ok(())
    }

    async fn load_abandonments(&self) -> Result<Vec<AbandonmentRecord>> {
        Ok(self.state.read().abandonments.clone())
    }

    async fn journal_envelope(&self, envelope: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write();
        if envelope.is_terminal() {
            state.envelopes.remove(&envelope.id);
        } else {
            state.envelopes.insert(envelope.id, envelope.clone());
        }
        Ok(())
    }

    async fn load_unfinished_envelopes(&self) -> Result<Vec<EventEnvelope>> {
        let mut envelopes: Vec<_> = self.state.read().envelopes.values().cloned().collect();
        envelopes.sort_by_key(|envelope| envelope.created_at);
        Ok(envelopes)
    }
}
