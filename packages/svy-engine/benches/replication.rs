use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use svy_engine::estimation::replicate_estimates;
use svy_engine::{
    build_design_weights, make_replicates, Design, DesignSpec, Parameter, ReplicationMethod, Sample, SampleUnit,
    StageSpec, VarianceConfig, VarianceEstimator, Weight,
};

/// Stratified cluster sample with `n_strata` strata of `clusters` clusters of
/// 8 units each.
fn generate_survey(n_strata: usize, clusters: usize, seed: u64) -> (Sample, Design, Weight) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut units = Vec::new();
    for h in 0..n_strata {
        let stratum = format!("s{}", h);
        for c in 0..clusters {
            let cluster = format!("s{}c{}", h, c);
            let level = rng.gen_range(10.0..50.0);
            for u in 0..8 {
                let y = level + rng.gen_range(-5.0..5.0);
                let x = rng.gen_range(1.0..3.0);
                units.push(
                    SampleUnit::new(format!("{}u{}", cluster, u), Some(stratum.as_str()), Some(cluster.as_str()), rng.gen_range(0.01..0.1))
                        .with_outcomes(vec![y, x]),
                );
            }
        }
    }
    let sample = Sample::new(units, vec!["y".into(), "x".into()], vec![], vec![]).unwrap();
    let design = Design::new(&sample, DesignSpec::single_stage(StageSpec::new(Some("stratum"), Some("psu")))).unwrap();
    let weight = build_design_weights(&sample, &design).unwrap();
    (sample, design, weight)
}

fn bench_make_replicates(c: &mut Criterion) {
    let mut group = c.benchmark_group("make_replicates");
    let methods = [
        ("jackknife", ReplicationMethod::Jackknife),
        ("fay", ReplicationMethod::Fay { epsilon: 0.3, collapse: Default::default() }),
        ("bootstrap", ReplicationMethod::Bootstrap { replicates: 200, seed: 42, rescale: true }),
    ];

    for &n_strata in &[10, 50] {
        let (_, design, weight) = generate_survey(n_strata, 2, 42);
        for (name, method) in &methods {
            group.bench_with_input(BenchmarkId::new(*name, n_strata), &n_strata, |b, _| {
                b.iter(|| make_replicates(black_box(&design), black_box(&weight), method).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_replicate_estimates(c: &mut Criterion) {
    let mut group = c.benchmark_group("replicate_estimates");

    for &n_strata in &[10, 50] {
        let (sample, design, weight) = generate_survey(n_strata, 4, 7);
        let table = make_replicates(&design, &weight, &ReplicationMethod::Jackknife).unwrap();
        let ratio = Parameter::ratio(&sample, "y", "x").unwrap();
        let median = Parameter::median(&sample, "y").unwrap();

        group.bench_with_input(BenchmarkId::new("ratio", n_strata), &table, |b, table| {
            b.iter(|| replicate_estimates(&ratio, &sample, black_box(table), None).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("median", n_strata), &table, |b, table| {
            b.iter(|| replicate_estimates(&median, &sample, black_box(table), None).unwrap())
        });
    }

    group.finish();
}

fn bench_taylor(c: &mut Criterion) {
    let mut group = c.benchmark_group("taylor");

    for &n_strata in &[10, 50, 200] {
        let (sample, design, weight) = generate_survey(n_strata, 4, 11);
        let ratio = Parameter::ratio(&sample, "y", "x").unwrap();
        let estimator = VarianceEstimator::new(&design, VarianceConfig::default()).unwrap();

        group.bench_with_input(BenchmarkId::new("ratio", n_strata), &n_strata, |b, _| {
            b.iter(|| estimator.taylor(&ratio, &sample, black_box(weight.values()), None).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_make_replicates, bench_replicate_estimates, bench_taylor);
criterion_main!(benches);
