//! # Envelope Tracker
//!
//! Latest in-memory copy of every live envelope plus a bounded tail of finished
//! ones. Live envelopes stay until they finish; finished envelopes are evicted
//! oldest-first once more than `retention` of them are held. Evicted history
//! remains in the sync log and abandonment records.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::models::{EnvelopeId, EventEnvelope};

#[derive(Debug)]
pub struct EnvelopeTracker {
    envelopes: DashMap<EnvelopeId, EventEnvelope>,
    /// Finished envelope ids in completion order
    completed: Mutex<VecDeque<EnvelopeId>>,
    retention: usize,
}

impl EnvelopeTracker {
    pub fn new(retention: usize) -> Self {
        Self {
            envelopes: DashMap::new(),
            completed: Mutex::new(VecDeque::new()),
            retention,
        }
    }

    /// Store the newest copy of an envelope.
    ///
    /// A terminal copy is final: later non-terminal writes for the same id are
    /// ignored, so a slow writer can never roll a finished envelope back.
    pub fn track(&self, envelope: EventEnvelope) {
        let id = envelope.id;
        let finished = envelope.is_terminal();
        let newly_finished = match self.envelopes.entry(id) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_terminal() {
                    return;
                }
                slot.insert(envelope);
                finished
            }
            Entry::Vacant(slot) => {
                slot.insert(envelope);
                finished
            }
        };

        if newly_finished {
            let evicted: Vec<EnvelopeId> = {
                let mut completed = self.completed.lock();
                completed.push_back(id);
                let excess = completed.len().saturating_sub(self.retention);
                completed.drain(..excess).collect()
            };
            for old in evicted {
                self.envelopes.remove_if(&old, |_, envelope| envelope.is_terminal());
            }
        }
    }

    pub fn get(&self, id: &EnvelopeId) -> Option<EventEnvelope> {
        self.envelopes.get(id).map(|entry| entry.value().clone())
    }

    /// Drop an envelope that never made it into the queue
    pub fn forget(&self, id: &EnvelopeId) {
        self.envelopes.remove(id);
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Envelopes not yet in a terminal state
    pub fn live_count(&self) -> usize {
        self.envelopes
            .iter()
            .filter(|entry| !entry.value().is_terminal())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, Priority};
    use crate::state_machine::DeliveryState;
    use serde_json::json;

    fn envelope() -> EventEnvelope {
        EventEnvelope::new(
            "pos",
            EventType::OrderCreated,
            json!({"order_id": 1}),
            Priority::Medium,
            2,
        )
    }

    fn finished(mut envelope: EventEnvelope) -> EventEnvelope {
        envelope.state = DeliveryState::Delivered;
        envelope
    }

    #[test]
    fn test_terminal_copy_is_not_overwritten_by_stale_write() {
        let tracker = EnvelopeTracker::new(10);
        let pending = envelope();
        let id = pending.id;

        tracker.track(finished(pending.clone()));
        tracker.track(pending);

        assert_eq!(tracker.get(&id).unwrap().state, DeliveryState::Delivered);
    }

    #[test]
    fn test_finished_envelopes_are_evicted_past_retention() {
        let tracker = EnvelopeTracker::new(2);
        let live = envelope();
        tracker.track(live.clone());

        let done: Vec<EventEnvelope> = (0..5).map(|_| finished(envelope())).collect();
        for envelope in &done {
            tracker.track(envelope.clone());
        }

        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.live_count(), 1);
        assert!(tracker.get(&live.id).is_some());
        assert!(tracker.get(&done[0].id).is_none());
        assert!(tracker.get(&done[2].id).is_none());
        assert!(tracker.get(&done[3].id).is_some());
        assert!(tracker.get(&done[4].id).is_some());
    }

    #[test]
    fn test_zero_retention_keeps_only_live_envelopes() {
        let tracker = EnvelopeTracker::new(0);
        let mut pending = envelope();
        tracker.track(pending.clone());
        assert_eq!(tracker.len(), 1);

        pending.state = DeliveryState::Abandoned;
        tracker.track(pending);
        assert!(tracker.is_empty());
    }
}
