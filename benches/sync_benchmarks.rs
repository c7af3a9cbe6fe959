use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use replica_sync::prelude::*;

fn linked_pair() -> (Rc<Replica>, Rc<Replica>, SyncLink) {
    let a = Rc::new(Replica::with_engine("A", Document::with_client_id(1)));
    let b = Rc::new(Replica::with_engine("B", Document::with_client_id(2)));
    let link = SyncLink::new(Rc::clone(&a), Rc::clone(&b)).unwrap();
    (a, b, link)
}

fn bench_live_relay(c: &mut Criterion) {
    c.bench_function("SyncLink live relay 200 appends", |b| {
        b.iter_batched(
            linked_pair,
            |(a, peer, _link)| {
                for i in 0..200 {
                    a.insert_text(i, "x").unwrap();
                }
                black_box(peer.text_len())
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_reconcile(c: &mut Criterion) {
    c.bench_function("SyncLink reconcile after 200 offline appends", |b| {
        b.iter_batched(
            || {
                let (a, peer, link) = linked_pair();
                link.set_online("B", false).unwrap();
                for i in 0..200 {
                    a.insert_text(i, "x").unwrap();
                }
                (a, peer, link)
            },
            |(_a, peer, link)| {
                link.set_online("B", true).unwrap();
                black_box(peer.text_len())
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_delta_since(c: &mut Criterion) {
    let mut doc = Document::with_client_id(1);
    doc.insert_text(0, &"lorem ipsum ".repeat(100)).unwrap();
    let empty = Document::with_client_id(2).state_vector().unwrap();
    let current = doc.state_vector().unwrap();

    c.bench_function("Document::encode_state_as_update full history", |b| {
        b.iter(|| black_box(doc.encode_state_as_update(&empty).unwrap().len()))
    });

    c.bench_function("Document::encode_state_as_update up to date", |b| {
        b.iter(|| black_box(doc.encode_state_as_update(&current).unwrap().len()))
    });
}

criterion_group!(benches, bench_live_relay, bench_reconcile, bench_delta_since);
criterion_main!(benches);
