use criterion::{criterion_group, criterion_main, Criterion};
use lamina::Message;

pub fn fill_and_drain() {
    let mut message = Message::new();
    for i in 0..1024u32 {
        message.push_back(i as u8).unwrap();
    }
    for _ in 0..1024 {
        message.pop_front().unwrap();
    }
}

pub fn linearize() -> usize {
    let payload = [0x5A; 1000];
    let mut message = Message::new();
    message.put(&payload).unwrap();
    let mut out = [0; 1000];
    message.get(&mut out, 0)
}

pub fn iterate() -> u32 {
    let payload = [1; 1000];
    let mut message = Message::new();
    message.put(&payload).unwrap();
    message.iter().map(u32::from).sum()
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("push/pop 1 KiB", |b| b.iter(fill_and_drain));
    c.bench_function("put/get 1000 bytes", |b| b.iter(linearize));
    c.bench_function("iterate 1000 bytes", |b| b.iter(iterate));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
