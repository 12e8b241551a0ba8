use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use traffic_intelligence::config::DensityConfig;
use traffic_intelligence::density::tracker::DensityTracker;
use traffic_intelligence::density::DensitySource;
use traffic_intelligence::models::network::create_default_network;
use traffic_intelligence::models::vehicle::{VehicleObservation, VehicleType};

/// Generates a dummy observation batch spread across the grid's roads.
fn generate_observations(count: usize) -> Vec<VehicleObservation> {
    let network = create_default_network();
    (0..count)
        .map(|i| {
            let road = &network.roads[i % network.roads.len()];
            VehicleObservation {
                vehicle_id: format!("veh-{}", i),
                number_plate: format!("KA-{:02}-{:04}", i % 78 + 1, 1000 + i % 9000),
                road_id: road.id.clone(),
                x: 0.0,
                y: 0.0,
                speed: 40.0,
                vehicle_type: VehicleType::Car,
            }
        })
        .collect()
}

fn bench_tracker_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("Density_Tracker_Update");

    for &batch in [50usize, 200, 500].iter() {
        let observations = generate_observations(batch);
        group.bench_with_input(
            BenchmarkId::new("update_tick", batch),
            &batch,
            |b, &_batch| {
                let mut tracker =
                    DensityTracker::new(&DensityConfig::default(), DensitySource::Simulation);
                tracker.initialize_roads(&create_default_network());
                let mut now = 0.0;
                b.iter(|| {
                    now += 1.0;
                    tracker.update(black_box(&observations), black_box(now));
                });
            },
        );
    }

    group.finish();
}

fn bench_city_metrics(c: &mut Criterion) {
    let mut tracker = DensityTracker::new(&DensityConfig::default(), DensitySource::Simulation);
    tracker.initialize_roads(&create_default_network());
    let observations = generate_observations(300);
    tracker.update(&observations, 1.0);

    c.bench_function("city_metrics", |b| {
        b.iter(|| {
            let metrics = tracker.get_city_metrics(black_box(2.0));
            black_box(metrics);
        });
    });
}

criterion_group!(benches, bench_tracker_update, bench_city_metrics);
criterion_main!(benches);
