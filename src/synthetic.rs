//! Synthetic checklists for tests and benchmarks
//!
//! Records fall in a 1° x 1° box around (42.5, -76.5) during 2019 weeks
//! 19-28, with three habitat columns: two land-cover proportions and a
//! median elevation.

use chrono::NaiveDate;
use rand::Rng;

use crate::data::{EffortCovariates, Observation, PredictionCell};

pub const HABITAT_COLUMNS: [&str; 3] = ["pland_04", "pland_13", "elevation_median"];

pub const BOX_CENTER: (f64, f64) = (42.5, -76.5);

/// `n` checklists, each a detection with probability `positive_fraction`.
pub fn checklists<R: Rng + ?Sized>(rng: &mut R, n: usize, positive_fraction: f64) -> Vec<Observation> {
    (0..n)
        .map(|i| {
            let day = rng.gen_range(130..200);
            let observation_date = NaiveDate::from_yo_opt(2019, day).unwrap_or_default();
            let traveling = rng.gen_bool(0.7);
            Observation {
                checklist_id: format!("S{:06}", i),
                latitude: rng.gen_range(BOX_CENTER.0 - 0.5..BOX_CENTER.0 + 0.5),
                longitude: rng.gen_range(BOX_CENTER.1 - 0.5..BOX_CENTER.1 + 0.5),
                observation_date,
                species_observed: rng.gen::<f64>() < positive_fraction,
                effort: EffortCovariates {
                    day_of_year: f64::from(day),
                    time_observations_started: rng.gen_range(5.0..21.0),
                    duration_minutes: rng.gen_range(5.0..300.0),
                    effort_distance_km: if traveling { rng.gen_range(0.1..5.0) } else { 0.0 },
                    number_observers: f64::from(rng.gen_range(1..5)),
                    protocol_traveling: if traveling { 1.0 } else { 0.0 },
                },
                habitat: vec![
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(100.0..600.0),
                ],
            }
        })
        .collect()
}

/// Replace every outcome with `rule(record)`.
pub fn relabel<F>(observations: &mut [Observation], rule: F)
where
    F: Fn(&Observation) -> bool,
{
    for observation in observations.iter_mut() {
        observation.species_observed = rule(observation);
    }
}

/// Regular prediction grid over the synthetic box, `side x side` cells.
pub fn prediction_cells<R: Rng + ?Sized>(rng: &mut R, side: usize) -> Vec<PredictionCell> {
    let step = 1.0 / side as f64;
    let mut cells = Vec::with_capacity(side * side);
    for row in 0..side {
        for col in 0..side {
            cells.push(PredictionCell {
                id: (row * side + col) as u64,
                latitude: BOX_CENTER.0 - 0.5 + (row as f64 + 0.5) * step,
                longitude: BOX_CENTER.1 - 0.5 + (col as f64 + 0.5) * step,
                habitat: vec![
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(100.0..600.0),
                ],
            });
        }
    }
    cells
}
