//! Partial dependence
//!
//! For each grid value of one covariate, that covariate is overwritten in
//! every reference row while the other covariates keep their observed
//! values, and the model's predictions are averaged. The sequence is lazy
//! and can be iterated any number of times; `par_collect` evaluates the grid
//! points in parallel and returns the same values as sequential iteration.

use rand::seq::index;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationCurve;
use crate::error::{PipelineError, Result};
use crate::forest::BalancedRandomForest;
use crate::utils::{linspace, quantile_sorted};

/// How grid values are placed over the covariate's observed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridKind {
    /// Evenly spaced from the observed minimum to maximum
    #[default]
    Even,
    /// At evenly spaced observed quantiles
    Quantile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialDependenceConfig {
    pub grid_size: usize,
    /// Cap on reference rows; larger reference sets are subsampled
    pub sample_size: Option<usize>,
    pub grid: GridKind,
    /// Curves are produced for this many of the most important covariates
    pub max_covariates: usize,
}

impl Default for PartialDependenceConfig {
    fn default() -> Self {
        Self {
            grid_size: 25,
            sample_size: Some(1000),
            grid: GridKind::Even,
            max_covariates: 9,
        }
    }
}

/// Response scale of the averaged predictions.
#[derive(Debug, Clone, Copy)]
pub enum ResponseScale<'a> {
    Raw,
    /// Calibrated and clipped to [0, 1]
    Calibrated(&'a CalibrationCurve),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PdPoint {
    pub value: f64,
    pub response: f64,
}

/// One row of the partial-dependence output table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdRow {
    pub covariate: String,
    pub value: f64,
    pub average_response: f64,
}

pub struct PartialDependence<'a> {
    forest: &'a BalancedRandomForest,
    scale: ResponseScale<'a>,
    covariate: String,
    column: usize,
    reference: Vec<Vec<f64>>,
    grid: Vec<f64>,
}

impl<'a> PartialDependence<'a> {
    /// Prepare the curve for `covariate` over `reference_rows` (feature rows
    /// in the forest's covariate order). Nothing is predicted until iterated.
    pub fn new<R: Rng + ?Sized>(
        forest: &'a BalancedRandomForest,
        scale: ResponseScale<'a>,
        covariate: &str,
        reference_rows: &[Vec<f64>],
        config: &PartialDependenceConfig,
        rng: &mut R,
    ) -> Result<Self> {
        let column = forest
            .feature_names()
            .iter()
            .position(|name| name == covariate)
            .ok_or_else(|| PipelineError::MissingCovariate {
                name: covariate.to_string(),
                available: forest.feature_names().to_vec(),
            })?;

        if reference_rows.is_empty() {
            return Err(PipelineError::insufficient(
                format!("partial dependence reference sample for {}", covariate),
                1,
                0,
            ));
        }
        if config.grid_size == 0 {
            return Err(PipelineError::Config(
                "partial dependence grid_size must be at least 1".into(),
            ));
        }

        let mut observed: Vec<f64> = reference_rows
            .iter()
            .map(|row| row[column])
            .filter(|v| v.is_finite())
            .collect();
        if observed.is_empty() {
            return Err(PipelineError::insufficient(
                format!("finite values of {}", covariate),
                1,
                0,
            ));
        }
        observed.sort_by(f64::total_cmp);
        let grid = build_grid(&observed, config.grid_size, config.grid);

        let reference = match config.sample_size {
            Some(cap) if cap > 0 && reference_rows.len() > cap => {
                let mut picked = index::sample(rng, reference_rows.len(), cap).into_vec();
                picked.sort_unstable();
                picked.into_iter().map(|i| reference_rows[i].clone()).collect()
            }
            _ => reference_rows.to_vec(),
        };

        tracing::debug!(
            "Partial dependence for {}: {} grid values over {} reference rows",
            covariate,
            grid.len(),
            reference.len()
        );

        Ok(Self {
            forest,
            scale,
            covariate: covariate.to_string(),
            column,
            reference,
            grid,
        })
    }

    /// Replace the grid with explicit values.
    pub fn with_grid(mut self, grid: Vec<f64>) -> Result<Self> {
        if grid.is_empty() {
            return Err(PipelineError::Config(format!(
                "empty partial dependence grid for {}",
                self.covariate
            )));
        }
        self.grid = grid;
        Ok(self)
    }

    pub fn covariate(&self) -> &str {
        &self.covariate
    }

    pub fn grid(&self) -> &[f64] {
        &self.grid
    }

    pub fn reference_size(&self) -> usize {
        self.reference.len()
    }

    /// Average response with the covariate fixed at `value`
    pub fn response_at(&self, value: f64) -> f64 {
        let mut row = Vec::with_capacity(self.forest.feature_names().len());
        let total: f64 = self
            .reference
            .iter()
            .map(|reference| {
                row.clear();
                row.extend_from_slice(reference);
                row[self.column] = value;
                let p = self.forest.predict(&row);
                match self.scale {
                    ResponseScale::Raw => p,
                    ResponseScale::Calibrated(curve) => curve.predict(p),
                }
            })
            .sum();
        total / self.reference.len() as f64
    }

    /// Lazy (value, response) sequence in grid order
    pub fn iter(&self) -> impl Iterator<Item = PdPoint> + '_ {
        self.grid.iter().map(move |&value| PdPoint {
            value,
            response: self.response_at(value),
        })
    }

    pub fn par_collect(&self) -> Vec<PdPoint> {
        self.grid
            .par_iter()
            .map(|&value| PdPoint {
                value,
                response: self.response_at(value),
            })
            .collect()
    }

    /// Evaluate every grid point as output table rows.
    pub fn rows(&self) -> Vec<PdRow> {
        self.par_collect()
            .into_iter()
            .map(|point| PdRow {
                covariate: self.covariate.clone(),
                value: point.value,
                average_response: point.response,
            })
            .collect()
    }
}

fn build_grid(sorted: &[f64], grid_size: usize, kind: GridKind) -> Vec<f64> {
    let lo = sorted[0];
    let hi = sorted[sorted.len() - 1];
    let mut grid = match kind {
        GridKind::Even => linspace(lo, hi, grid_size),
        GridKind::Quantile => linspace(0.0, 1.0, grid_size)
            .into_iter()
            .map(|q| quantile_sorted(sorted, q))
            .collect(),
    };
    // Constant covariates and tied quantiles collapse to one value
    grid.dedup();
    grid
}
