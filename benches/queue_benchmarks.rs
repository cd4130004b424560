use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use integration_bus::models::{EventEnvelope, EventType, IntegrationRule, Priority, RuleTarget};
use integration_bus::orchestration::PriorityEventQueue;
use integration_bus::registry::{RuleCatalog, TransformRegistry};
use integration_bus::storage::MemoryStore;
use serde_json::json;
use std::sync::Arc;

const PRIORITIES: [Priority; 4] = [
    Priority::Low,
    Priority::Medium,
    Priority::High,
    Priority::Critical,
];

fn envelopes(count: usize) -> Vec<EventEnvelope> {
    (0..count)
        .map(|i| {
            EventEnvelope::new(
                "pos",
                EventType::SaleCompleted,
                json!({ "sale_id": i, "total": 10.0 }),
                PRIORITIES[i % PRIORITIES.len()],
                2,
            )
        })
        .collect()
}

fn benchmark_enqueue_and_claim(c: &mut Criterion) {
    c.bench_function("queue_enqueue_claim_1000", |b| {
        b.iter_batched(
            || envelopes(1_000),
            |batch| {
                let queue = PriorityEventQueue::default();
                for envelope in batch {
                    queue.enqueue(envelope).unwrap();
                }
                while let Some(envelope) = queue.try_dequeue().unwrap() {
                    black_box(envelope);
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn benchmark_rule_resolution(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let catalog = RuleCatalog::new(Arc::new(MemoryStore::new()));
    runtime.block_on(async {
        for i in 0..200 {
            let rule = IntegrationRule::new(
                format!("rule-{i}"),
                format!("source-{}", i % 20),
                [EventType::SaleCompleted, EventType::OrderCreated],
                [RuleTarget::new(format!("target-{}", i % 35), "identity")],
            )
            .with_priority_weight((i % 5) as i32);
            catalog.add_rule(rule).await.unwrap();
        }
    });

    c.bench_function("rule_resolve_200_rules", |b| {
        b.iter(|| black_box(catalog.resolve("source-7", &EventType::SaleCompleted)))
    });
}

fn benchmark_kitchen_transform(c: &mut Criterion) {
    let transforms = TransformRegistry::with_builtins();
    let sale = json!({
        "sale_id": "S-1",
        "table": 4,
        "total": 58.0,
        "items": [
            {"name": "Ramen", "quantity": 2},
            {"name": "Gyoza", "quantity": 1},
            {"name": "Matcha"}
        ]
    });

    c.bench_function("transform_sale_to_kitchen_ticket", |b| {
        b.iter(|| black_box(transforms.apply("sale_to_kitchen_ticket", &sale).unwrap()))
    });
}

criterion_group!(
    benches,
    benchmark_enqueue_and_claim,
    benchmark_rule_resolution,
    benchmark_kitchen_transform
);
criterion_main!(benches);
