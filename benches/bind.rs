use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use wireup::{Cloned, Collection, ProvideErrorKind};

fn sample_chain() -> Collection {
    Collection::new("pipeline")
        .value(10_u32)
        .provide(|Cloned(x): Cloned<i64>, Cloned(base): Cloned<u32>| {
            Ok::<_, ProvideErrorKind>((x as u64 + u64::from(base),))
        })
        .provide(|Cloned(sum): Cloned<u64>| Ok::<_, ProvideErrorKind>((sum.to_string(),)))
        .provide(|Cloned(text): Cloned<String>| Ok::<_, ProvideErrorKind>((text.len() as i64,)))
}

fn bench_bind(c: &mut Criterion) {
    let chain = sample_chain();
    c.bench_function("bind", |b| {
        b.iter(|| black_box(&chain).bind::<(i64,), (i64,)>().unwrap());
    });
}

fn bench_invoke(c: &mut Criterion) {
    let chain = sample_chain();
    let invoker = chain.bind::<(i64,), (i64,)>().unwrap();
    invoker.call((1,)).unwrap();
    c.bench_function("invoke_steady_state", |b| {
        b.iter(|| invoker.call(black_box((1234,))).unwrap());
    });
}

criterion_group!(benches, bench_bind, bench_invoke);
criterion_main!(benches);
