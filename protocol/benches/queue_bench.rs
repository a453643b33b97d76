// Gossip-path benchmarks for the tangle protocol.
//
// Covers weight-queue push/pop under overflow and the duplicate-packet
// cache lookup that every inbound datagram goes through.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tangle_protocol::config::TRANSACTION_SIZE_BYTES;
use tangle_protocol::crypto::{sha256_array, Hash};
use tangle_protocol::network::{DedupCache, WeightQueue};
use tangle_protocol::transaction::{TransactionBuilder, TransactionRecord};

fn records(n: usize) -> Vec<Arc<TransactionRecord>> {
    (0..n as u64)
        .map(|i| {
            Arc::new(
                TransactionBuilder::new()
                    .timestamp(1_600_000_000 + i)
                    .value(i as i64)
                    .build(),
            )
        })
        .collect()
}

fn bench_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue/push_pop");
    for capacity in [100usize, 1_000] {
        let items = records(capacity * 2);
        group.throughput(Throughput::Elements(items.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &items, |b, items| {
            b.iter(|| {
                let queue = WeightQueue::new(capacity);
                for item in items {
                    queue.push(Arc::clone(item));
                }
                while queue.pop().is_some() {}
            });
        });
    }
    group.finish();
}

fn bench_packet_digest_lookup(c: &mut Criterion) {
    let cache = DedupCache::default();
    let payloads: Vec<Vec<u8>> = (0..1_000u32)
        .map(|i| {
            let mut payload = vec![0u8; TRANSACTION_SIZE_BYTES];
            payload[..4].copy_from_slice(&i.to_le_bytes());
            payload
        })
        .collect();
    for payload in payloads.iter().step_by(2) {
        cache.insert_packet(sha256_array(payload), Hash::NULL);
    }

    c.bench_function("cache/digest_and_lookup", |b| {
        let mut i = 0;
        b.iter(|| {
            let digest = sha256_array(&payloads[i % payloads.len()]);
            i += 1;
            cache.lookup_packet(&digest)
        });
    });
}

criterion_group!(benches, bench_queue_push_pop, bench_packet_digest_lookup);
criterion_main!(benches);
