use criterion::{black_box, criterion_group, criterion_main, Criterion};

use arx_collider::{ArxSpec, DifferentialPath, Propagator, SeedDifferential};

fn bench_propagate_fixpoint(c: &mut Criterion) {
    let spec = ArxSpec::md5();
    let seed = SeedDifferential::trivial(spec.iv, spec.message_words);
    c.bench_function("propagate_fixpoint_md5", |b| {
        b.iter(|| {
            let mut path = DifferentialPath::seeded(&spec, &seed).unwrap();
            Propagator::new(&spec).propagate_all(black_box(&mut path)).unwrap();
            path
        })
    });

    let toy = ArxSpec::toy8();
    let toy_seed = SeedDifferential::from_message_xor(toy.iv, vec![0x8000_0000, 0, 0, 0]);
    c.bench_function("propagate_fixpoint_toy_diff", |b| {
        b.iter(|| {
            let mut path = DifferentialPath::seeded(&toy, &toy_seed).unwrap();
            Propagator::new(&toy).propagate_all(black_box(&mut path)).unwrap();
            path
        })
    });
}

fn bench_compress(c: &mut Criterion) {
    let spec = ArxSpec::md5();
    let block: [u32; 16] = core::array::from_fn(|i| 0x0101_0101u32.wrapping_mul(i as u32 + 1));
    c.bench_function("compress_md5", |b| {
        b.iter(|| spec.compress(black_box(spec.iv), black_box(&block)))
    });
}

criterion_group!(benches, bench_propagate_fixpoint, bench_compress);
criterion_main!(benches);
