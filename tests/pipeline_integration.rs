//! Full pipeline on synthetic checklists, from table files to output files.

use encounter_rate_rust::config::PipelineConfig;
use encounter_rate_rust::data::{self, HabitatSchema, Observation};
use encounter_rate_rust::output;
use encounter_rate_rust::pipeline;
use encounter_rate_rust::synthetic::{self, HABITAT_COLUMNS};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt::Write as _;
use std::fs;

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.seed = 17;
    config.grid.spacing_km = 3.0;
    config.forest.n_trees = 60;
    config.partial_dependence.grid_size = 10;
    config.partial_dependence.sample_size = Some(200);
    config.peak.grid_size = 96;
    config
}

/// Detections favour open habitat and early mornings.
fn labelled_checklists(n: usize) -> Vec<Observation> {
    let mut rng = StdRng::seed_from_u64(4);
    let mut observations = synthetic::checklists(&mut rng, n, 0.0);
    synthetic::relabel(&mut observations, |o| {
        o.habitat[0] > 0.7 || (o.habitat[0] > 0.4 && o.effort.time_observations_started < 9.0)
    });
    observations
}

#[test]
fn test_pipeline_produces_all_outputs() {
    let observations = labelled_checklists(1500);
    let mut rng = StdRng::seed_from_u64(8);
    let cells = synthetic::prediction_cells(&mut rng, 10);
    let schema = HabitatSchema::new(&HABITAT_COLUMNS).unwrap();

    let outputs = pipeline::run(&fast_config(), &schema, &observations, &cells).unwrap();

    let counts = outputs.counts;
    assert_eq!(counts.input, 1500);
    assert!(counts.subsampled <= counts.input);
    assert_eq!(counts.train + counts.test, counts.subsampled);

    let record = outputs.record();
    assert!(record.auc > 0.8, "AUC {}", record.auc);
    assert!((0.0..=1.0).contains(&record.mse_calibrated));
    assert!(record.threshold_raw > 0.0 && record.threshold_raw < 1.0);

    // Importance covers every covariate, highest first
    assert_eq!(outputs.importance.len(), 9);
    assert_eq!(outputs.importance[0].covariate, "pland_04");
    assert!(outputs.importance.windows(2).all(|w| w[0].score >= w[1].score));

    // Nine covariates, ten grid values each
    assert_eq!(outputs.partial_dependence.len(), 90);
    assert!(outputs
        .partial_dependence
        .iter()
        .all(|row| (0.0..=1.0).contains(&row.average_response)));

    // Checklists start between 5 and 21 h, so the peak must too
    let peak = outputs.peak.unwrap();
    assert!((5.0..=21.0).contains(&peak.hour), "peak at {}", peak.hour);
    assert_eq!(outputs.standard_observation.time_observations_started, peak.hour);

    assert_eq!(outputs.surface.estimates.len(), 100);
    assert_eq!(outputs.surface.incomplete, 0);
    assert!(outputs
        .surface
        .estimates
        .iter()
        .all(|e| (0.0..=1.0).contains(&e.estimate)));

    let dir = tempfile::tempdir().unwrap();
    output::write_all(&outputs, dir.path()).unwrap();
    for file in ["report.json", "predictions.csv", "importance.csv", "partial_dependence.csv"] {
        assert!(dir.path().join(file).exists(), "{} not written", file);
    }
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("report.json")).unwrap()).unwrap();
    assert!(report["record"]["kappa"].is_number());
    assert!(report["record"]["threshold_calibrated"].is_number());
}

#[test]
fn test_same_seed_same_results() {
    let observations = labelled_checklists(600);
    let mut rng = StdRng::seed_from_u64(8);
    let cells = synthetic::prediction_cells(&mut rng, 4);
    let schema = HabitatSchema::new(&HABITAT_COLUMNS).unwrap();
    let mut config = fast_config();
    config.forest.n_trees = 20;

    let first = pipeline::run(&config, &schema, &observations, &cells).unwrap();
    let second = pipeline::run(&config, &schema, &observations, &cells).unwrap();

    assert_eq!(first.counts.train, second.counts.train);
    assert_eq!(first.record().kappa, second.record().kappa);
    assert_eq!(first.surface.estimates, second.surface.estimates);
}

#[test]
fn test_pipeline_from_csv_tables() {
    let observations = labelled_checklists(500);
    let dir = tempfile::tempdir().unwrap();

    let mut checklists = String::from(
        "checklist_id,latitude,longitude,observation_date,species_observed,\
         time_observations_started,duration_minutes,effort_distance_km,number_observers,\
         protocol_type,pland_04,pland_13,elevation_median\n",
    );
    for o in &observations {
        writeln!(
            checklists,
            "{},{},{},{},{},{},{},{},{},{},{},{},{}",
            o.checklist_id,
            o.latitude,
            o.longitude,
            o.observation_date.format("%Y-%m-%d"),
            o.species_observed,
            o.effort.time_observations_started,
            o.effort.duration_minutes,
            o.effort.effort_distance_km,
            o.effort.number_observers,
            if o.effort.protocol_traveling > 0.5 { "Traveling" } else { "Stationary" },
            o.habitat[0],
            o.habitat[1],
            o.habitat[2]
        )
        .unwrap();
    }
    let checklist_path = dir.path().join("checklists.csv");
    fs::write(&checklist_path, checklists).unwrap();

    let mut rng = StdRng::seed_from_u64(8);
    let mut grid = String::from("id,latitude,longitude,pland_04,pland_13,elevation_median\n");
    for cell in synthetic::prediction_cells(&mut rng, 3) {
        writeln!(
            grid,
            "{},{},{},{},{},{}",
            cell.id, cell.latitude, cell.longitude, cell.habitat[0], cell.habitat[1], cell.habitat[2]
        )
        .unwrap();
    }
    let grid_path = dir.path().join("grid.csv");
    fs::write(&grid_path, grid).unwrap();

    let columns = data::infer_habitat_columns(&checklist_path).unwrap();
    assert_eq!(columns, HABITAT_COLUMNS.to_vec());
    let schema = HabitatSchema::new(columns.as_slice()).unwrap();
    let loaded = data::load_observations(&checklist_path, &schema).unwrap();
    let cells = data::load_prediction_grid(&grid_path, &schema).unwrap();
    assert_eq!(loaded.len(), 500);
    assert_eq!(loaded[0].effort.day_of_year, observations[0].effort.day_of_year);

    let mut config = fast_config();
    config.forest.n_trees = 20;
    let outputs = pipeline::run(&config, &schema, &loaded, &cells).unwrap();
    assert_eq!(outputs.surface.estimates.len(), 9);
}
