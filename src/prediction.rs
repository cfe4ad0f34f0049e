//! Surface Predictor
//!
//! Every prediction cell gets the same standard observation (effort held
//! fixed) together with its own habitat covariates. The estimate is
//! `clip(calibrate(model(covariates)), 0, 1)`.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationCurve;
use crate::data::{EffortCovariates, PredictionCell};
use crate::error::{ClipDiagnostics, PipelineError, Result};
use crate::features::FeatureSet;
use crate::forest::BalancedRandomForest;

/// Effort of the standardised checklist used for mapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardObservation {
    pub day_of_year: f64,
    /// Used only when the model has no time-of-day covariate; otherwise
    /// replaced by the peak time
    pub time_observations_started: f64,
    pub duration_minutes: f64,
    pub effort_distance_km: f64,
    pub number_observers: f64,
    pub traveling: bool,
}

impl Default for StandardObservation {
    fn default() -> Self {
        // One hour, 1 km traveling count by a single observer in mid June
        Self {
            day_of_year: 166.0,
            time_observations_started: 7.0,
            duration_minutes: 60.0,
            effort_distance_km: 1.0,
            number_observers: 1.0,
            traveling: true,
        }
    }
}

impl StandardObservation {
    pub fn at_hour(self, hour: f64) -> Self {
        Self {
            time_observations_started: hour,
            ..self
        }
    }

    pub fn effort(&self) -> EffortCovariates {
        EffortCovariates {
            day_of_year: self.day_of_year,
            time_observations_started: self.time_observations_started,
            duration_minutes: self.duration_minutes,
            effort_distance_km: self.effort_distance_km,
            number_observers: self.number_observers,
            protocol_traveling: if self.traveling { 1.0 } else { 0.0 },
        }
    }
}

/// One row of the prediction table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellEstimate {
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    /// Encounter rate in [0, 1]; NaN when the cell lacks a covariate (null in the written table)
    pub estimate: f64,
}

#[derive(Debug, Clone)]
pub struct Surface {
    pub estimates: Vec<CellEstimate>,
    pub clipping: ClipDiagnostics,
    /// Cells skipped for missing covariates
    pub incomplete: usize,
}

pub struct SurfacePredictor<'a> {
    forest: &'a BalancedRandomForest,
    calibration: &'a CalibrationCurve,
    features: &'a FeatureSet,
    effort: EffortCovariates,
}

impl<'a> SurfacePredictor<'a> {
    pub fn new(
        forest: &'a BalancedRandomForest,
        calibration: &'a CalibrationCurve,
        features: &'a FeatureSet,
        standard: &StandardObservation,
    ) -> Result<Self> {
        if forest.feature_names() != features.names() {
            return Err(PipelineError::Schema(format!(
                "forest covariates {:?} do not match feature set {:?}",
                forest.feature_names(),
                features.names()
            )));
        }
        Ok(Self {
            forest,
            calibration,
            features,
            effort: standard.effort(),
        })
    }

    /// Estimate for one cell, and whether the calibrated value was clipped
    fn estimate(&self, cell: &PredictionCell) -> (f64, Option<bool>) {
        let row = self.features.row(&self.effort, &cell.habitat);
        if !row.iter().all(|v| v.is_finite()) {
            return (f64::NAN, None);
        }
        let g = self.calibration.raw(self.forest.predict(&row));
        let clipped = g.clamp(0.0, 1.0);
        (clipped, Some(clipped != g))
    }

    pub fn predict(&self, cells: &[PredictionCell]) -> Surface {
        let results: Vec<(CellEstimate, Option<bool>)> = cells
            .par_iter()
            .map(|cell| {
                let (estimate, clipped) = self.estimate(cell);
                let row = CellEstimate {
                    id: cell.id,
                    latitude: cell.latitude,
                    longitude: cell.longitude,
                    estimate,
                };
                (row, clipped)
            })
            .collect();

        let mut clipping = ClipDiagnostics::default();
        let mut incomplete = 0;
        let estimates = results
            .into_iter()
            .map(|(row, clipped)| {
                match clipped {
                    Some(was_clipped) => clipping.record(was_clipped),
                    None => incomplete += 1,
                }
                row
            })
            .collect();

        clipping.log("surface prediction");
        if incomplete > 0 {
            tracing::warn!(
                "{} of {} prediction cells lack covariates; estimates set to NaN",
                incomplete,
                cells.len()
            );
        }
        tracing::info!(
            "Predicted encounter rate for {} cells at {:.2} h",
            cells.len() - incomplete,
            self.effort.time_observations_started
        );

        Surface {
            estimates,
            clipping,
            incomplete,
        }
    }
}
