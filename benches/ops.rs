use criterion::{black_box, criterion_group, criterion_main, Criterion};
use defrc::{AcquireRetire, Arc, AtomicArc, Ebr, Smr};

fn load<S: Smr>(slot: &AtomicArc<u64, S>) {
    black_box(slot.load());
}

fn snapshot<S: Smr>(slot: &AtomicArc<u64, S>) {
    black_box(slot.get_snapshot());
}

fn store<S: Smr>(slot: &AtomicArc<u64, S>) {
    slot.store(Some(Arc::new(black_box(1))));
}

fn criterion_benchmark(c: &mut Criterion) {
    let ar = AtomicArc::<u64, AcquireRetire>::new(Some(Arc::new(0)));
    let ebr = AtomicArc::<u64, Ebr>::new(Some(Arc::new(0)));

    c.bench_function("acquire-retire load", |b| b.iter(|| load(&ar)));
    c.bench_function("acquire-retire snapshot", |b| b.iter(|| snapshot(&ar)));
    c.bench_function("acquire-retire store", |b| b.iter(|| store(&ar)));

    c.bench_function("ebr load", |b| b.iter(|| load(&ebr)));
    c.bench_function("ebr snapshot", |b| b.iter(|| snapshot(&ebr)));
    c.bench_function("ebr store", |b| b.iter(|| store(&ebr)));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
