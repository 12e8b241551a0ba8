use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use traffic_intelligence::config::{PredictionAlgorithm, PredictionConfig};
use traffic_intelligence::density::history::DensitySnapshot;
use traffic_intelligence::density::DensityLevel;
use traffic_intelligence::prediction::engine::PredictionEngine;

fn generate_history(len: usize) -> Vec<DensitySnapshot> {
    (0..len)
        .map(|i| DensitySnapshot {
            timestamp: 1000.0 + i as f64,
            road_id: "R-4-5".to_string(),
            vehicle_count: (i % 40) as u32,
            density_score: 30.0 + (i % 50) as f64,
            classification: DensityLevel::Medium,
        })
        .collect()
}

fn bench_algorithms(c: &mut Criterion) {
    let history = generate_history(300);
    let mut group = c.benchmark_group("Prediction_Algorithms");

    for (name, algorithm) in [
        ("moving_average", PredictionAlgorithm::MovingAverage),
        ("linear_trend", PredictionAlgorithm::LinearTrend),
        ("exponential_smoothing", PredictionAlgorithm::ExponentialSmoothing),
    ] {
        let mut config = PredictionConfig::default();
        config.algorithm = algorithm;
        let engine = PredictionEngine::new(&config);
        group.bench_with_input(BenchmarkId::new(name, 300), &name, |b, _| {
            b.iter(|| {
                let prediction =
                    engine.predict(black_box("R-4-5"), black_box(&history), black_box(1300.0));
                black_box(prediction);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_algorithms);
criterion_main!(benches);
