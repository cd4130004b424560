//! # Sync Log
//!
//! Append-only audit trail of dispatch attempts and abandonments. Records are
//! visible to queries as soon as they are appended and are never edited.
//!
//! Persistence is write-behind on failure: a record the store rejects stays in
//! an ordered backlog and is written ahead of the next append (or by
//! [`SyncLog::flush`]), so the store receives records in append order.

use parking_lot::{Mutex as SyncMutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::error::Result;
use crate::models::{AbandonmentRecord, AuditQuery, EnvelopeId, SyncLogEntry, SyncOutcome};
use crate::state_machine::DeliveryState;
use crate::storage::BusStore;

#[derive(Debug, Clone)]
enum PendingWrite {
    Entry(SyncLogEntry),
    Abandonment(AbandonmentRecord),
}

pub struct SyncLog {
    entries: RwLock<Vec<SyncLogEntry>>,
    abandonments: RwLock<Vec<AbandonmentRecord>>,
    /// Records not yet accepted by the store, oldest first
    unpersisted: SyncMutex<VecDeque<PendingWrite>>,
    append_gate: Mutex<()>,
    store: Arc<dyn BusStore>,
}

impl std::fmt::Debug for SyncLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLog")
            .field("entries", &self.entries.read().len())
            .field("abandonments", &self.abandonments.read().len())
            .field("unpersisted", &self.unpersisted.lock().len())
            .finish()
    }
}

impl SyncLog {
    pub fn new(store: Arc<dyn BusStore>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            abandonments: RwLock::new(Vec::new()),
            unpersisted: SyncMutex::new(VecDeque::new()),
            append_gate: Mutex::new(()),
            store,
        }
    }

    /// Reload history from the store
    pub async fn restore(&self) -> Result<usize> {
        let _gate = self.append_gate.lock().await;
        let entries = self.store.load_sync_entries().await?;
        let abandonments = self.store.load_abandonments().await?;
        let count = entries.len();
        *self.entries.write() = entries;
        *self.abandonments.write() = abandonments;
        Ok(count)
    }

    /// Record one dispatch attempt. The entry is kept even when the store
    /// rejects it; the error reports that persistence is behind.
    pub async fn append(&self, entry: SyncLogEntry) -> Result<()> {
        let _gate = self.append_gate.lock().await;
        self.entries.write().push(entry.clone());
        self.unpersisted.lock().push_back(PendingWrite::Entry(entry));
        self.persist_backlog().await
    }

    pub async fn record_abandonment(&self, record: AbandonmentRecord) -> Result<()> {
        let _gate = self.append_gate.lock().await;
        error!(
            envelope_id = %record.envelope_id,
            source_id = %record.source_id,
            event_type = %record.event_type,
            undelivered = ?record.undelivered_targets,
            retry_count = record.retry_count,
            severity = ?record.severity,
            reason = %record.reason,
            "Envelope abandoned"
        );
        self.abandonments.write().push(record.clone());
        self.unpersisted
            .lock()
            .push_back(PendingWrite::Abandonment(record));
        self.persist_backlog().await
    }

    /// Retry writing records the store rejected earlier. Returns how many remain.
    pub async fn flush(&self) -> Result<usize> {
        let _gate = self.append_gate.lock().await;
        self.persist_backlog().await?;
        Ok(self.unpersisted())
    }

    /// Records held in memory that the store has not accepted yet
    pub fn unpersisted(&self) -> usize {
        self.unpersisted.lock().len()
    }

    /// Write the backlog in order, stopping at the first rejection.
    /// Callers hold the append gate.
    async fn persist_backlog(&self) -> Result<()> {
        loop {
            let next = self.unpersisted.lock().front().cloned();
            let Some(write) = next else {
                return Ok(());
            };
            let written = match &write {
                PendingWrite::Entry(entry) => self.store.append_sync_entry(entry).await,
                PendingWrite::Abandonment(record) => self.store.append_abandonment(record).await,
            };
            if let Err(e) = written {
                warn!(
                    backlog = self.unpersisted.lock().len(),
                    error = %e,
                    "Sync log persistence is behind"
                );
                return Err(e);
            }
            self.unpersisted.lock().pop_front();
        }
    }

    /// Entries matching the query, in append order
    pub fn query(&self, query: &AuditQuery) -> Vec<SyncLogEntry> {
        let entries = self.entries.read();
        let matching = entries.iter().filter(|entry| query.matches(entry)).cloned();
        match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    pub fn entries_for_envelope(&self, envelope_id: EnvelopeId) -> Vec<SyncLogEntry> {
        self.query(&AuditQuery::new().for_envelope(envelope_id))
    }

    /// Final state of an envelope as far as the trail shows: an abandonment
    /// means partial or abandoned, attempts without one mean delivered. Only
    /// meaningful for envelopes known to be finished.
    pub fn terminal_state_for(&self, envelope_id: EnvelopeId) -> Option<DeliveryState> {
        let entries = self.entries_for_envelope(envelope_id);
        let any_delivered = entries
            .iter()
            .any(|entry| entry.outcome == SyncOutcome::Success);
        if self.abandonment_for(envelope_id).is_some() {
            return Some(if any_delivered {
                DeliveryState::Partial
            } else {
                DeliveryState::Abandoned
            });
        }
        (!entries.is_empty()).then_some(DeliveryState::Delivered)
    }

    pub fn abandonments(&self) -> Vec<AbandonmentRecord> {
        self.abandonments.read().clone()
    }

    pub fn abandonment_for(&self, envelope_id: EnvelopeId) -> Option<AbandonmentRecord> {
        self.abandonments
            .read()
            .iter()
            .find(|record| record.envelope_id == envelope_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, FailureKind, RouteTarget, SyncOutcome};
    use crate::storage::MemoryStore;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn entry(envelope_id: Uuid, target: &str, ok: bool) -> SyncLogEntry {
        let route = RouteTarget::new("rule", target, "identity");
        if ok {
            SyncLogEntry::success(envelope_id, "pos", &EventType::SaleCompleted, &route, 1, 3)
        } else {
            SyncLogEntry::failure(
                envelope_id,
                "pos",
                &EventType::SaleCompleted,
                &route,
                1,
                3,
                FailureKind::Delivery,
                "rejected",
            )
        }
    }

    #[tokio::test]
    async fn test_query_filters_by_module_and_outcome() {
        let log = SyncLog::new(Arc::new(MemoryStore::new()));
        let envelope = Uuid::new_v4();
        log.append(entry(envelope, "kitchen", true)).await.unwrap();
        log.append(entry(envelope, "finance", false)).await.unwrap();
        log.append(entry(Uuid::new_v4(), "kitchen", false)).await.unwrap();

        assert_eq!(log.query(&AuditQuery::new().for_module("kitchen")).len(), 2);
        // The source module is involved in every entry
        assert_eq!(log.query(&AuditQuery::new().for_module("pos")).len(), 3);
        assert_eq!(
            log.query(&AuditQuery::new().with_outcome(SyncOutcome::Failure))
                .len(),
            2
        );
        assert_eq!(log.entries_for_envelope(envelope).len(), 2);
        assert_eq!(log.query(&AuditQuery::new().limit(1)).len(), 1);
    }

    #[tokio::test]
    async fn test_time_range_and_restore() {
        let store: Arc<dyn BusStore> = Arc::new(MemoryStore::new());
        let log = SyncLog::new(store.clone());
        log.append(entry(Uuid::new_v4(), "kitchen", true)).await.unwrap();

        let now = Utc::now();
        let past = AuditQuery::new().between(now - Duration::hours(2), now - Duration::hours(1));
        assert!(log.query(&past).is_empty());
        let around = AuditQuery::new().between(now - Duration::hours(1), now + Duration::hours(1));
        assert_eq!(log.query(&around).len(), 1);

        let reloaded = SyncLog::new(store);
        assert_eq!(reloaded.restore().await.unwrap(), 1);
        assert!(!reloaded.is_empty());
    }
}
