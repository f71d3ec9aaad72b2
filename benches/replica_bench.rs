//! Replica and transform throughput on synthetic editing sessions.

use coedit::Operation;
use coedit::OtDocument;
use coedit::Replica;
use coedit::Session;
use coedit::TextReplica;
use coedit::ot::transform_batch;
use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Random typing and deleting, the way a person edits a paragraph.
fn random_edits<R: Replica>(replica: &mut R, count: usize, seed: u64) -> Vec<Operation> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        let len = replica.len();
        if len > 0 && rng.gen_bool(0.25) {
            let pos = rng.gen_range(0..len);
            let del = rng.gen_range(1..=(len - pos).min(8));
            ops.push(replica.delete(pos, del).unwrap());
        } else {
            let pos = rng.gen_range(0..=len);
            let ch = rng.gen_range(b'a'..=b'z') as char;
            ops.push(replica.insert(pos, &ch.to_string()).unwrap());
        }
    }
    return ops;
}

fn bench_local_edits(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_edits");
    for count in [100, 1_000, 5_000] {
        group.bench_with_input(BenchmarkId::new("crdt", count), &count, |b, &count| {
            b.iter(|| {
                let mut replica = TextReplica::new("alice");
                random_edits(&mut replica, count, 42);
                black_box(replica.len())
            });
        });
        group.bench_with_input(BenchmarkId::new("ot", count), &count, |b, &count| {
            b.iter(|| {
                let mut doc = OtDocument::new("alice");
                random_edits(&mut doc, count, 42);
                black_box(doc.len())
            });
        });
    }
    group.finish();
}

fn bench_remote_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("remote_apply");
    for count in [100, 1_000, 5_000] {
        let mut source = TextReplica::new("alice");
        let ops = random_edits(&mut source, count, 7);

        group.bench_with_input(BenchmarkId::new("in_order", count), &ops, |b, ops| {
            b.iter(|| {
                let mut replica = TextReplica::new("bob");
                replica.apply_operations(ops).unwrap();
                black_box(replica.text())
            });
        });

        // Reversed delivery defers almost every operation.
        if count > 1_000 {
            continue;
        }
        let mut reversed = ops.clone();
        reversed.reverse();
        group.bench_with_input(BenchmarkId::new("reversed", count), &reversed, |b, ops| {
            b.iter(|| {
                let mut replica = TextReplica::new("bob");
                replica.apply_operations(ops).unwrap();
                black_box(replica.text())
            });
        });
    }
    group.finish();
}

fn bench_transform_batch(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(3);
    let ops: Vec<Operation> = (0..200)
        .map(|i| {
            let author = format!("user{}", i % 8);
            let pos = rng.gen_range(0..1_000);
            if rng.gen_bool(0.5) {
                Operation::insert(pos, "abc", author).with_id(i)
            } else {
                Operation::delete(pos, rng.gen_range(1..20), author).with_id(i)
            }
        })
        .collect();

    c.bench_function("transform_batch_200", |b| {
        b.iter(|| black_box(transform_batch(&ops).unwrap()));
    });
}

fn bench_session_typing(c: &mut Criterion) {
    c.bench_function("session_typing_1000", |b| {
        b.iter(|| {
            let mut session = Session::new("alice");
            for i in 0..1_000u64 {
                session.insert_text_at(i as usize, "x", i * 10).unwrap();
            }
            session.undo().unwrap();
            black_box(session.len())
        });
    });
}

criterion_group!(benches, bench_local_edits, bench_remote_apply, bench_transform_batch, bench_session_typing);
criterion_main!(benches);
