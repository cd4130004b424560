//! Proptest strategies for bus domain values.

use integration_bus::models::Priority;
use proptest::prelude::*;

pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Medium),
        Just(Priority::High),
        Just(Priority::Critical),
    ]
}

/// Module identifiers: non-empty, no whitespace
pub fn module_id_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}"
}

pub fn priorities_strategy(max_len: usize) -> impl Strategy<Value = Vec<Priority>> {
    prop::collection::vec(priority_strategy(), 1..max_len)
}
