use criterion::{criterion_group, criterion_main, Criterion};
use strand_core::channel::Channel;

fn bench_single(c: &mut Criterion) {
    let ch = Channel::new(1024);
    c.bench_function("channel_write_read", |b| {
        b.iter(|| {
            ch.write(1u64, false);
            ch.read(false)
        })
    });
}

fn bench_batch(c: &mut Criterion) {
    let ch = Channel::new(1024);
    c.bench_function("channel_write_read_n64", |b| {
        b.iter(|| {
            ch.write_n((0u64..64).collect(), false);
            ch.read_n(64, false)
        })
    });
}

criterion_group!(benches, bench_single, bench_batch);
criterion_main!(benches);
