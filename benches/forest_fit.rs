use criterion::{black_box, criterion_group, criterion_main, Criterion};
use encounter_rate_rust::calibration::{CalibrationConfig, CalibrationCurve};
use encounter_rate_rust::data::HabitatSchema;
use encounter_rate_rust::features::FeatureSet;
use encounter_rate_rust::forest::{BalancedRandomForest, ForestConfig};
use encounter_rate_rust::synthetic::{self, HABITAT_COLUMNS};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn training_matrix(n: usize) -> (Vec<Vec<f64>>, Vec<bool>, Vec<String>) {
    let mut rng = StdRng::seed_from_u64(42);
    let mut observations = synthetic::checklists(&mut rng, n, 0.0);
    synthetic::relabel(&mut observations, |o| o.habitat[0] > 0.8 && o.effort.duration_minutes > 60.0);

    let schema = HabitatSchema::new(&HABITAT_COLUMNS).expect("synthetic schema should be valid");
    let features = FeatureSet::all(&schema).expect("synthetic features should resolve");
    (
        features.matrix(&observations),
        FeatureSet::labels(&observations),
        features.names().to_vec(),
    )
}

fn bench_forest_fit(c: &mut Criterion) {
    let (x, y, names) = training_matrix(5_000);
    let config = ForestConfig {
        n_trees: 100,
        ..ForestConfig::default()
    };

    c.bench_function("forest_fit_5k_100_trees", |b| {
        b.iter(|| {
            let mut rng = StdRng::seed_from_u64(1);
            BalancedRandomForest::fit(black_box(&x), black_box(&y), &names, &config, &mut rng)
                .expect("forest benchmark fit should succeed")
        })
    });
}

fn bench_calibration_fit(c: &mut Criterion) {
    let (x, y, names) = training_matrix(5_000);
    let config = ForestConfig {
        n_trees: 50,
        ..ForestConfig::default()
    };
    let mut rng = StdRng::seed_from_u64(1);
    let forest = BalancedRandomForest::fit(&x, &y, &names, &config, &mut rng)
        .expect("forest benchmark fit should succeed");
    let predictions = forest.predict_batch(&x);

    c.bench_function("calibration_fit_5k", |b| {
        b.iter(|| {
            CalibrationCurve::fit(black_box(&predictions), black_box(&y), &CalibrationConfig::default())
                .expect("calibration benchmark fit should succeed")
        })
    });
}

criterion_group!(benches, bench_forest_fit, bench_calibration_fit);
criterion_main!(benches);
