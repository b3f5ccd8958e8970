#![forbid(unsafe_code)]

use std::{hint::black_box, sync::Arc, time::Duration};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use kithara_adapt::{
    AbrEngine, AbrOptions, BandwidthEstimator, LoadStats, MediaSnapshot, QualityLevel,
    SegmentRequest, StreamKind,
};
use web_time::Instant;

fn ladder(count: u64) -> Vec<QualityLevel> {
    (1..=count).map(|i| QualityLevel::new(i * 400_000)).collect()
}

fn engine(levels: u64, ahead: f64) -> AbrEngine<MediaSnapshot> {
    let opts = AbrOptions::default();
    let estimator = BandwidthEstimator::for_stream(&opts, StreamKind::OnDemand);
    AbrEngine::with_estimator(
        opts,
        ladder(levels),
        MediaSnapshot::playing(30.0, ahead),
        estimator,
    )
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_next_level");
    for levels in [4_u64, 8, 16] {
        for (label, ahead) in [("comfortable", 40.0), ("recovery", 6.0)] {
            let e = engine(levels, ahead);
            group.bench_with_input(BenchmarkId::new(label, levels), &e, |b, e| {
                b.iter(|| black_box(e.decide_next_level()));
            });
        }
    }
    group.finish();
}

fn bench_feedback(c: &mut Criterion) {
    c.bench_function("start_complete_cycle", |b| {
        let mut e = engine(8, 20.0);
        let t0 = Instant::now();
        b.iter(|| {
            let request = Arc::new(SegmentRequest::new(3, Duration::from_secs(6)));
            e.on_request_started(Arc::clone(&request), t0);
            let stats = LoadStats::completed(t0 + Duration::from_millis(900), 600_000);
            black_box(e.on_request_completed(&request, stats));
        });
    });

    c.bench_function("estimator_sample", |b| {
        let mut est = BandwidthEstimator::for_stream(&AbrOptions::default(), StreamKind::Live);
        b.iter(|| {
            est.sample(black_box(Duration::from_millis(800)), black_box(500_000));
            black_box(est.estimate_bps());
        });
    });
}

criterion_group!(benches, bench_select, bench_feedback);
criterion_main!(benches);
