//! # Priority Event Queue
//!
//! Total order over waiting envelopes: priority descending, then `created_at`,
//! then insertion sequence. Retries wait in a separate delay index until their
//! backoff elapses and are promoted on the next claim attempt.
//!
//! Every mutation happens under one lock. Claiming moves the envelope to
//! `processing` inside that lock, so an envelope can never be claimed twice.
//! Waiters park on a [`Notify`] and, when retries are pending, a timer for the
//! earliest eligibility; nothing polls.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::backoff::BackoffPolicy;
use crate::error::{BusError, Result};
use crate::models::{EnvelopeId, EventEnvelope, Priority};
use crate::state_machine::{EnvelopeEvent, EnvelopeStateMachine};

type ReadyKey = (Reverse<Priority>, DateTime<Utc>, u64);
type DelayKey = (Instant, u64);

#[derive(Debug, Clone, Copy)]
enum Slot {
    Ready(ReadyKey),
    Delayed(DelayKey),
}

#[derive(Debug)]
struct Waiting {
    envelope: EventEnvelope,
    slot: Slot,
}

#[derive(Debug, Default)]
struct QueueState {
    waiting: HashMap<EnvelopeId, Waiting>,
    ready: BTreeMap<ReadyKey, EnvelopeId>,
    delayed: BTreeMap<DelayKey, EnvelopeId>,
    /// Claimed envelopes and whether cancellation was requested mid-round
    in_flight: HashMap<EnvelopeId, bool>,
    next_sequence: u64,
    closed: bool,
}

impl QueueState {
    fn insert_ready(&mut self, envelope: EventEnvelope) {
        self.next_sequence += 1;
        let key = (Reverse(envelope.priority), envelope.created_at, self.next_sequence);
        self.ready.insert(key, envelope.id);
        self.waiting.insert(
            envelope.id,
            Waiting {
                envelope,
                slot: Slot::Ready(key),
            },
        );
    }

    fn insert_delayed(&mut self, envelope: EventEnvelope, eligible_at: Instant) {
        self.next_sequence += 1;
        let key = (eligible_at, self.next_sequence);
        self.delayed.insert(key, envelope.id);
        self.waiting.insert(
            envelope.id,
            Waiting {
                envelope,
                slot: Slot::Delayed(key),
            },
        );
    }

    /// Move every retry whose backoff has elapsed into the ready index
    fn promote_due(&mut self, now: Instant) {
        while let Some((&key, _)) = self.delayed.first_key_value() {
            if key.0 > now {
                break;
            }
            let Some(id) = self.delayed.remove(&key) else {
                break;
            };
            if let Some(waiting) = self.waiting.get_mut(&id) {
                self.next_sequence += 1;
                let ready_key = (
                    Reverse(waiting.envelope.priority),
                    waiting.envelope.created_at,
                    self.next_sequence,
                );
                waiting.slot = Slot::Ready(ready_key);
                self.ready.insert(ready_key, id);
            }
        }
    }

    fn remove_waiting(&mut self, id: &EnvelopeId) -> Option<EventEnvelope> {
        let waiting = self.waiting.remove(id)?;
        match waiting.slot {
            Slot::Ready(key) => self.ready.remove(&key),
            Slot::Delayed(key) => self.delayed.remove(&key),
        };
        Some(waiting.envelope)
    }

    fn claim_next(&mut self) -> Result<Option<EventEnvelope>> {
        self.promote_due(Instant::now());
        let Some((_, id)) = self.ready.pop_first() else {
            return Ok(None);
        };
        let Some(waiting) = self.waiting.remove(&id) else {
            return Err(BusError::Internal(format!(
                "ready index referenced missing envelope {id}"
            )));
        };

        let mut envelope = waiting.envelope;
        EnvelopeStateMachine::transition(&mut envelope, &EnvelopeEvent::Claim)?;
        self.in_flight.insert(id, envelope.cancel_requested);
        Ok(Some(envelope))
    }

    fn next_wake(&self) -> Option<Instant> {
        self.delayed.first_key_value().map(|(key, _)| key.0)
    }
}

/// Result of asking the queue to cancel an envelope
#[derive(Debug, Clone, PartialEq)]
pub enum QueueCancel {
    /// Removed while waiting and moved to its terminal state
    Removed(EventEnvelope),
    /// Currently claimed; the dispatcher will finalize after this round
    InFlight,
    /// Not waiting and not claimed
    NotQueued,
}

/// Result of handing a failed round back to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    Scheduled(Duration),
    /// Cancellation arrived during the round; the envelope was not requeued
    CancelRequested,
}

#[derive(Debug)]
pub struct PriorityEventQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: BackoffPolicy,
}

impl PriorityEventQueue {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
        }
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Make an envelope immediately eligible
    pub fn enqueue(&self, envelope: EventEnvelope) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(BusError::ValidationError("event queue is closed".to_string()));
            }
            if state.waiting.contains_key(&envelope.id) || state.in_flight.contains_key(&envelope.id) {
                return Err(BusError::ValidationError(format!(
                    "envelope {} is already queued",
                    envelope.id
                )));
            }
            state.insert_ready(envelope);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Claim the best eligible envelope without waiting
    pub fn try_dequeue(&self) -> Result<Option<EventEnvelope>> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(None);
        }
        state.claim_next()
    }

    /// Wait until an envelope is eligible and claim it. Returns `None` once closed.
    pub async fn dequeue_next(&self) -> Result<Option<EventEnvelope>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state.lock();
                if state.closed {
                    return Ok(None);
                }
                if let Some(envelope) = state.claim_next()? {
                    return Ok(Some(envelope));
                }
                state.next_wake()
            };

            match wake_at {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Schedule another round for a claimed envelope after its backoff.
    ///
    /// Fails with `ExhaustedRetries` once `retry_count` has reached `max_retries`;
    /// the envelope is left untouched in that case.
    pub fn requeue(&self, envelope: &mut EventEnvelope) -> Result<RequeueOutcome> {
        let delay = {
            let mut state = self.state.lock();
            match state.in_flight.get(&envelope.id) {
                None => {
                    return Err(BusError::Internal(format!(
                        "requeue of unclaimed envelope {}",
                        envelope.id
                    )))
                }
                Some(true) => return Ok(RequeueOutcome::CancelRequested),
                Some(false) => {}
            }
            if !envelope.retries_remaining() {
                return Err(BusError::ExhaustedRetries {
                    envelope_id: envelope.id,
                    max_retries: envelope.max_retries,
                });
            }

            EnvelopeStateMachine::transition(envelope, &EnvelopeEvent::ScheduleRetry)?;
            envelope.retry_count += 1;
            let delay = self.backoff.delay_for(envelope.retry_count);

            state.in_flight.remove(&envelope.id);
            state.insert_delayed(envelope.clone(), Instant::now() + delay);
            delay
        };

        debug!(
            envelope_id = %envelope.id,
            retry_count = envelope.retry_count,
            delay_ms = delay.as_millis() as u64,
            "Envelope requeued"
        );
        // Wake a waiter so it re-arms its timer for the new deadline
        self.notify.notify_one();
        Ok(RequeueOutcome::Scheduled(delay))
    }

    /// Cancel a waiting envelope, or flag a claimed one
    pub fn cancel(&self, id: EnvelopeId) -> Result<QueueCancel> {
        let mut state = self.state.lock();
        if let Some(flag) = state.in_flight.get_mut(&id) {
            *flag = true;
            return Ok(QueueCancel::InFlight);
        }
        match state.remove_waiting(&id) {
            Some(mut envelope) => {
                envelope.cancel_requested = true;
                EnvelopeStateMachine::transition(&mut envelope, &EnvelopeEvent::Cancel)?;
                Ok(QueueCancel::Removed(envelope))
            }
            None => Ok(QueueCancel::NotQueued),
        }
    }

    /// Whether cancellation was requested for a claimed envelope
    pub fn cancel_requested(&self, id: EnvelopeId) -> bool {
        self.state.lock().in_flight.get(&id).copied().unwrap_or(false)
    }

    /// Release the claim on an envelope that reached a terminal state.
    /// Returns whether cancellation had been requested.
    pub fn complete(&self, id: EnvelopeId) -> bool {
        self.state.lock().in_flight.remove(&id).unwrap_or(false)
    }

    /// Stop handing out envelopes and wake every waiter
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Envelopes waiting (ready or in backoff), excluding claimed ones
    pub fn len(&self) -> usize {
        self.state.lock().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}

impl Default for PriorityEventQueue {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
