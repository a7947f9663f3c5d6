//! Envelope wire-protocol throughput benchmark.
//!
//! Measures serialize_protocol/deserialize_protocol round-trip latency over
//! a range of binary body sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dipeo_engine::envelope::{deserialize_protocol, serialize_protocol};
use dipeo_engine::types::{ExecutionId, NodeId};
use dipeo_engine::{Envelope, EnvelopeFactory};

fn make_envelope(size: usize) -> Envelope {
    let trace_id = ExecutionId::new();
    let node_id = NodeId::from_string("bench-node".to_string()).expect("valid node id");
    EnvelopeFactory::binary(vec![0xABu8; size], Some("raw".to_string()), trace_id, node_id)
}

fn bench_serialize(c: &mut Criterion) {
    let payload_sizes: &[usize] = &[0, 64, 1024, 4096, 65536];

    let mut group = c.benchmark_group("serialize_protocol");
    for &size in payload_sizes {
        let env = make_envelope(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &env, |b, env| {
            b.iter(|| serialize_protocol(black_box(env)));
        });
    }
    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let payload_sizes: &[usize] = &[0, 64, 1024, 4096, 65536];

    let mut group = c.benchmark_group("protocol_round_trip");
    for &size in payload_sizes {
        let env = make_envelope(size);
        let wire = serde_json::to_value(serialize_protocol(&env)).expect("wire value");
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, wire| {
            b.iter(|| deserialize_protocol(black_box(wire)).expect("round trip decodes"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_serialize, bench_round_trip);
criterion_main!(benches);
