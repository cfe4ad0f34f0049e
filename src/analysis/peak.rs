//! Peak time of day
//!
//! The standard observation is placed at the start time with the highest
//! partial-dependence response, searching only hours that are well covered
//! by the training checklists.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::partial_dependence::{PartialDependence, PartialDependenceConfig, PdPoint, ResponseScale};
use crate::data::EffortField;
use crate::error::{PipelineError, Result};
use crate::forest::BalancedRandomForest;
use crate::utils::linspace;

const HOURS_PER_DAY: f64 = 24.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Candidate start times over 0-24 h
    pub grid_size: usize,
    pub bin_width_hours: f64,
    /// Bins holding less than this share of training checklists are skipped
    pub min_bin_share: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            grid_size: 300,
            bin_width_hours: 1.0,
            min_bin_share: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeakTime {
    /// Decimal hours since midnight
    pub hour: f64,
    pub response: f64,
    /// Grid points that passed the coverage filter
    pub eligible_points: usize,
}

/// Share of `times` falling in each `bin_width`-hour bin of the day.
pub fn hour_shares(times: &[f64], bin_width: f64) -> Vec<f64> {
    let n_bins = (HOURS_PER_DAY / bin_width).ceil() as usize;
    let mut counts = vec![0usize; n_bins];
    let mut total = 0usize;
    for &t in times.iter().filter(|t| t.is_finite()) {
        counts[bin_of(t, bin_width, n_bins)] += 1;
        total += 1;
    }
    if total == 0 {
        return vec![0.0; n_bins];
    }
    counts.iter().map(|&c| c as f64 / total as f64).collect()
}

fn bin_of(hour: f64, bin_width: f64, n_bins: usize) -> usize {
    let bin = (hour / bin_width).floor();
    if bin < 0.0 {
        0
    } else {
        (bin as usize).min(n_bins - 1)
    }
}

/// Argmax of `curve` over points whose hour bin holds at least
/// `min_bin_share` of `times`. The earliest point wins ties.
pub fn select_peak(curve: &[PdPoint], times: &[f64], config: &PeakConfig) -> Result<PeakTime> {
    let shares = hour_shares(times, config.bin_width_hours);
    let mut eligible_points = 0;
    let mut best: Option<PdPoint> = None;

    for point in curve {
        let share = shares[bin_of(point.value, config.bin_width_hours, shares.len())];
        if share < config.min_bin_share {
            continue;
        }
        eligible_points += 1;
        if best.map_or(true, |b| point.response > b.response) {
            best = Some(*point);
        }
    }

    let best = best.ok_or_else(|| {
        PipelineError::insufficient(
            "time-of-day grid points in adequately sampled hours",
            1,
            0,
        )
    })?;
    Ok(PeakTime {
        hour: best.value,
        response: best.response,
        eligible_points,
    })
}

/// Peak start time for a forest trained with `time_observations_started`.
///
/// `training_rows` are the forest's training feature rows; they define both
/// the hour coverage and the reference sample for the partial dependence.
pub fn peak_time<R: Rng + ?Sized>(
    forest: &BalancedRandomForest,
    scale: ResponseScale<'_>,
    training_rows: &[Vec<f64>],
    pd_config: &PartialDependenceConfig,
    config: &PeakConfig,
    rng: &mut R,
) -> Result<PeakTime> {
    let name = EffortField::TimeObservationsStarted.name();
    let pd = PartialDependence::new(forest, scale, name, training_rows, pd_config, rng)?
        .with_grid(linspace(0.0, HOURS_PER_DAY, config.grid_size))?;

    let column = forest
        .feature_names()
        .iter()
        .position(|n| n == name)
        .unwrap_or_default();
    let times: Vec<f64> = training_rows.iter().map(|row| row[column]).collect();

    let peak = select_peak(&pd.par_collect(), &times, config)?;
    tracing::info!(
        "Peak time of day: {:.2} h (response {:.3}, {} of {} grid points eligible)",
        peak.hour,
        peak.response,
        peak.eligible_points,
        pd.grid().len()
    );
    Ok(peak)
}
