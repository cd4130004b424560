mod common;

use common::strategies::*;
use integration_bus::models::{EventEnvelope, EventType, ModuleDescriptor, Priority};
use integration_bus::orchestration::{BackoffPolicy, PriorityEventQueue};
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;

fn envelope(priority: Priority, seq: usize) -> EventEnvelope {
    EventEnvelope::new(
        "pos",
        EventType::SaleCompleted,
        json!({ "seq": seq }),
        priority,
        2,
    )
}

proptest! {
    /// Property: claims come out priority-descending, publish order within a priority
    #[test]
    fn queue_claims_follow_priority_then_fifo(priorities in priorities_strategy(40)) {
        let queue = PriorityEventQueue::default();
        for (seq, priority) in priorities.iter().enumerate() {
            queue.enqueue(envelope(*priority, seq)).unwrap();
        }

        let mut claimed = Vec::new();
        while let Some(env) = queue.try_dequeue().unwrap() {
            claimed.push((env.priority, env.payload["seq"].as_u64().unwrap()));
        }
        prop_assert_eq!(claimed.len(), priorities.len());

        for pair in claimed.windows(2) {
            let (p1, s1) = pair[0];
            let (p2, s2) = pair[1];
            prop_assert!(p1 >= p2, "priority went up: {:?} then {:?}", p1, p2);
            if p1 == p2 {
                prop_assert!(s1 < s2, "FIFO broken within {:?}: {} then {}", p1, s1, s2);
            }
        }
    }

    /// Property: no envelope is ever claimed twice
    #[test]
    fn queue_never_claims_an_envelope_twice(priorities in priorities_strategy(30)) {
        let queue = PriorityEventQueue::default();
        let mut ids = Vec::new();
        for (seq, priority) in priorities.iter().enumerate() {
            let env = envelope(*priority, seq);
            ids.push(env.id);
            queue.enqueue(env).unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        while let Some(env) = queue.try_dequeue().unwrap() {
            prop_assert!(seen.insert(env.id));
        }
        prop_assert_eq!(seen.len(), ids.len());
        prop_assert_eq!(queue.in_flight(), ids.len());
    }

    /// Property: backoff doubles per retry and never exceeds its cap
    #[test]
    fn backoff_is_exponential_and_capped(
        base_ms in 1u64..1_000,
        cap_factor in 1u64..64,
        retry in 1u32..40,
    ) {
        let base = Duration::from_millis(base_ms);
        let max = Duration::from_millis(base_ms * cap_factor);
        let policy = BackoffPolicy::new(base, max);

        let delay = policy.delay_for(retry);
        prop_assert!(delay <= max);
        prop_assert!(delay >= base.min(max));
        if retry < 30 {
            let uncapped = base.saturating_mul(1u32 << (retry - 1));
            prop_assert_eq!(delay, uncapped.min(max));
        }
    }

    /// Property: any whitespace-free, non-empty id with an address is a valid registration
    #[test]
    fn well_formed_descriptors_validate(id in module_id_strategy()) {
        let descriptor = ModuleDescriptor::new(id.clone(), "Module", format!("http://{id}:8080"));
        prop_assert!(descriptor.validate().is_ok());

        let spaced = ModuleDescriptor::new(format!("{id} x"), "Module", "http://x");
        prop_assert!(spaced.validate().is_err());
    }
}
