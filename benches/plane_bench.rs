// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Benchmarks for plane fitting and the full detection pass.
//!
//! Run with: cargo bench --bench plane_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use edgefirst_tabletop::{
    buffer::{Point, PointBuffer},
    config::{DetectorConfig, PlaneFitParams},
    detector::Detector,
    frame::FrameQueue,
    plane::fit_plane,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Noisy table top at z = 0.6 with `outlier_ratio` of the points scattered
/// uniformly above it.
fn generate_table(n_points: usize, outlier_ratio: f32, seed: u64) -> PointBuffer {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_outliers = (n_points as f32 * outlier_ratio) as usize;
    let mut cloud = PointBuffer::with_capacity(n_points, "bench");
    for i in 0..n_points {
        let (x, y) = (rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0));
        let z = if i < n_outliers {
            rng.gen_range(0.3..0.58)
        } else {
            0.6 + rng.gen_range(-0.005..0.005)
        };
        cloud.push(Point::new(x, y, z, [120; 3]));
    }
    cloud
}

fn bench_fit_plane(c: &mut Criterion) {
    let mut group = c.benchmark_group("ransac");
    group.sample_size(20);

    for &n_points in &[5_000, 20_000, 40_000] {
        let cloud = generate_table(n_points, 0.3, 1);
        let params = PlaneFitParams::default();

        group.throughput(Throughput::Elements(n_points as u64));
        group.bench_with_input(BenchmarkId::new("points", n_points), &cloud, |b, cloud| {
            let mut rng = StdRng::seed_from_u64(5);
            b.iter(|| fit_plane(cloud, &params, &mut rng));
        });
    }

    group.finish();
}

fn bench_detect_cloud(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect_cloud");
    group.sample_size(10);

    let cloud = generate_table(40_000, 0.2, 2);
    let config = DetectorConfig {
        seed: Some(3),
        ..Default::default()
    };
    group.bench_function("table_40k", |b| {
        let mut detector = Detector::new(config.clone(), FrameQueue::default()).unwrap();
        b.iter(|| detector.detect_cloud(&cloud));
    });

    group.finish();
}

criterion_group!(benches, bench_fit_plane, bench_detect_cloud);
criterion_main!(benches);
