use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ripple_core::{Derived, RefreshPolicy, Runtime, Source};

/// A chain of `len` derived values, each adding one to the previous.
fn chain(rt: &Runtime, len: usize) -> (Source<u64>, Derived<u64>) {
    let head = rt.create_source(0u64);
    let mut tail = rt.create_derived(move |rt| rt.read(head));
    for _ in 1..len {
        let previous = tail;
        tail = rt.create_derived(move |rt| Ok(rt.read(previous)? + 1));
    }
    (head, tail)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_then_read_chain");
    for len in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            let rt = Runtime::new();
            let (head, tail) = chain(&rt, len);
            let mut value = 0u64;
            b.iter(|| {
                value += 1;
                head.set(&rt, value).unwrap();
                black_box(tail.get(&rt).unwrap())
            });
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out_effects");
    for width in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let rt = Runtime::new();
            let root = rt.create_unit(None, RefreshPolicy::OnDemand).unwrap();
            let source = rt.create_source(0u64);
            for _ in 0..width {
                rt.create_effect(move |rt| {
                    black_box(rt.read(source)?);
                    Ok(())
                })
                .unwrap();
            }
            let mut value = 0u64;
            b.iter(|| {
                value += 1;
                source.set(&rt, value).unwrap();
                rt.tick(root).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_wide_tree");
    for width in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let rt = Runtime::new();
            let root = rt.create_unit(None, RefreshPolicy::OnDemand).unwrap();
            let source = rt.create_source(0u64);
            let mut last = root;
            for i in 0..width {
                let unit = rt.create_unit(Some(root), RefreshPolicy::OnDemand).unwrap();
                if i % 10 == 0 {
                    rt.bind(unit, move |rt, _| {
                        black_box(rt.read(source)?);
                        Ok(())
                    })
                    .unwrap();
                }
                last = unit;
            }
            rt.tick(root).unwrap();

            let mut value = 0u64;
            b.iter(|| {
                value += 1;
                source.set(&rt, value).unwrap();
                rt.mark_dirty(last).unwrap();
                rt.tick(root).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chain, bench_fan_out, bench_tick);
criterion_main!(benches);
