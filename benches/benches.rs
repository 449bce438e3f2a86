use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use sa_slurper::{
    average::{accumulate, AveragedTrace, AveragingDomain},
    waterfall::WaterfallBuffer,
    yfactor::estimate,
    FrequencyAxis, Trace,
};

const POINTS: usize = 1001;

fn noise_trace(rng: &mut impl Rng, floor: f64) -> Trace {
    Trace::new((0..POINTS).map(|_| floor + rng.gen_range(-0.5..0.5)).collect())
}

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    // Containers
    let traces: Vec<_> = (0..16).map(|_| noise_trace(&mut rng, -130.0)).collect();
    let axis = Arc::new(FrequencyAxis::linspace(375e6, 500e6, POINTS));
    let mut waterfall = WaterfallBuffer::new(100, axis).unwrap();
    let hot = AveragedTrace::single(noise_trace(&mut rng, -128.0), AveragingDomain::Linear);
    let cold = AveragedTrace::single(noise_trace(&mut rng, -131.0), AveragingDomain::Linear);

    c.bench_function("average 16 traces (dBm)", |b| {
        b.iter(|| accumulate(black_box(&traces), black_box(AveragingDomain::Dbm)))
    });

    c.bench_function("average 16 traces (linear)", |b| {
        b.iter(|| accumulate(black_box(&traces), black_box(AveragingDomain::Linear)))
    });

    c.bench_function("waterfall push", |b| {
        b.iter(|| waterfall.push(black_box(&traces[0])))
    });

    c.bench_function("waterfall snapshot", |b| b.iter(|| waterfall.snapshot()));

    c.bench_function("y-factor estimate", |b| {
        b.iter(|| {
            estimate(
                black_box(&hot),
                black_box(&cold),
                black_box(295.0),
                black_box(77.0),
                black_box(Some(15.0)),
            )
        })
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
