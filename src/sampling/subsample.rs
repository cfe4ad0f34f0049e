//! Stratified Subsampler
//!
//! Keeps one uniformly chosen checklist per (detection, year, week, cell)
//! stratum. Subsampling detections and non-detections separately keeps a
//! larger share of the rare class than subsampling the pooled data; the cell
//! and week keys thin out spatial and temporal clustering.

use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::data::Observation;
use crate::grid::{CellId, HexGrid, TimeBucket};

/// Composite key used only while subsampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StratumKey {
    pub species_observed: bool,
    pub time: TimeBucket,
    pub cell: CellId,
}

impl StratumKey {
    pub fn of(observation: &Observation, grid: &HexGrid) -> Self {
        StratumKey {
            species_observed: observation.species_observed,
            time: TimeBucket::of(observation),
            cell: grid.cell_of(observation.latitude, observation.longitude),
        }
    }
}

/// Record indices grouped by stratum, in key order. Records without a
/// finite location belong to no cell and are left out.
pub fn strata(observations: &[Observation], grid: &HexGrid) -> Vec<(StratumKey, SmallVec<[usize; 4]>)> {
    let mut groups: FxHashMap<StratumKey, SmallVec<[usize; 4]>> = FxHashMap::default();
    let mut unlocated = 0;
    for (idx, observation) in observations.iter().enumerate() {
        if !(observation.latitude.is_finite() && observation.longitude.is_finite()) {
            unlocated += 1;
            continue;
        }
        groups
            .entry(StratumKey::of(observation, grid))
            .or_default()
            .push(idx);
    }
    if unlocated > 0 {
        tracing::warn!("{} checklists have no location and were not subsampled", unlocated);
    }

    let mut groups: Vec<_> = groups.into_iter().collect();
    groups.sort_unstable_by_key(|(key, _)| *key);
    groups
}

/// Draw one checklist per stratum. Output keeps input order; inputs are untouched.
pub fn subsample_stratified<R: Rng + ?Sized>(
    observations: &[Observation],
    grid: &HexGrid,
    rng: &mut R,
) -> Vec<Observation> {
    let groups = strata(observations, grid);

    let mut chosen: Vec<usize> = groups
        .iter()
        .filter_map(|(_, members)| members.choose(rng).copied())
        .collect();
    chosen.sort_unstable();

    let sampled: Vec<Observation> = chosen.iter().map(|&i| observations[i].clone()).collect();

    let detections_before = observations.iter().filter(|o| o.species_observed).count();
    let detections_after = sampled.iter().filter(|o| o.species_observed).count();
    tracing::info!(
        "Subsampled {} checklists to {} ({} strata at {} km spacing)",
        observations.len(),
        sampled.len(),
        groups.len(),
        grid.spacing_km()
    );
    tracing::debug!(
        "Detection rate before subsampling: {:.2}%, after: {:.2}%",
        100.0 * detection_rate(detections_before, observations.len()),
        100.0 * detection_rate(detections_after, sampled.len())
    );

    sampled
}

fn detection_rate(detections: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        detections as f64 / total as f64
    }
}
