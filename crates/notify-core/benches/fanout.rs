//! Fan-out benchmarks for Notify.
//!
//! Measures validation plus delivery of one backend message to every member
//! of a room.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use notify_core::{ClientId, EventSink, MembershipService, MessageRouter, Payload, RoomId};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One room with a fixed member list; deliveries are only counted.
struct StaticRoom {
    members: Vec<ClientId>,
    delivered: AtomicUsize,
}

impl StaticRoom {
    fn new(size: usize) -> Self {
        Self {
            members: (0..size).map(|i| format!("client-{}", i)).collect(),
            delivered: AtomicUsize::new(0),
        }
    }
}

impl MembershipService for StaticRoom {
    fn bind(&self, _events: EventSink) {}

    fn is_empty(&self, _room: &str) -> bool {
        self.members.is_empty()
    }

    fn members_of(&self, _room: &str) -> Vec<ClientId> {
        self.members.clone()
    }

    fn all_rooms(&self) -> Vec<RoomId> {
        vec!["bench".to_string()]
    }

    fn all_clients(&self) -> Vec<ClientId> {
        self.members.clone()
    }

    fn send_to_client(&self, _client: &str, _event: &str, data: &Value) {
        black_box(data);
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }
}

/// Benchmark fan-out of a pre-parsed payload across room sizes.
fn bench_fanout_structured(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout_structured");

    for size in [1usize, 10, 100, 1000] {
        let router = MessageRouter::new(Arc::new(StaticRoom::new(size)));
        let payload = json!({"type": "update", "data": {"id": 42, "status": "done"}});

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                router
                    .on_message("bench", Payload::Json(black_box(payload.clone())))
                    .unwrap()
            });
        });
    }

    group.finish();
}

/// Benchmark parsing a serialized payload before fan-out.
fn bench_fanout_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout_text");

    let router = MessageRouter::new(Arc::new(StaticRoom::new(100)));
    let payload = r#"{"type":"update","data":{"id":42,"status":"done"}}"#;

    group.throughput(Throughput::Elements(100));
    group.bench_function("100_members", |b| {
        b.iter(|| router.on_message("bench", Payload::from(black_box(payload))).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_fanout_structured, bench_fanout_text);
criterion_main!(benches);
