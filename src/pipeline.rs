//! Encounter-rate pipeline
//!
//! Stages run in a fixed order on a single seeded random source:
//!
//! 1. hexagonal grid over the study region
//! 2. one checklist per (detection, week, cell) stratum
//! 3. train/test split after complete-case filtering
//! 4. balanced random forest on the training set
//! 5. monotone calibration on in-sample training predictions
//! 6. raw vs calibrated evaluation on the test set
//! 7. importance, partial dependence and peak time of day
//! 8. encounter-rate surface for a standard checklist
//!
//! Each stage returns new collections; nothing is mutated in place.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::time::Instant;

use crate::analysis::{self, ImportanceRow, PartialDependence, PdRow, PeakTime, ResponseScale};
use crate::calibration::CalibrationCurve;
use crate::config::PipelineConfig;
use crate::data::{EffortField, HabitatSchema, Observation, PredictionCell};
use crate::error::{ClipDiagnostics, PipelineError, Result};
use crate::evaluation::{self, EvaluationReport, ReportRecord};
use crate::features::FeatureSet;
use crate::forest::BalancedRandomForest;
use crate::grid::HexGrid;
use crate::prediction::{StandardObservation, Surface, SurfacePredictor};
use crate::sampling::{subsample_stratified, train_test_split};

/// Record counts at each stage.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageCounts {
    pub input: usize,
    pub subsampled: usize,
    pub train: usize,
    pub test: usize,
    pub prediction_cells: usize,
}

pub struct PipelineOutputs {
    pub counts: StageCounts,
    pub forest: BalancedRandomForest,
    pub calibration: CalibrationCurve,
    /// Clipping of calibrated test-set predictions
    pub calibration_clipping: ClipDiagnostics,
    pub report: EvaluationReport,
    pub importance: Vec<ImportanceRow>,
    pub partial_dependence: Vec<PdRow>,
    /// `None` when the model has no time-of-day covariate
    pub peak: Option<PeakTime>,
    pub standard_observation: StandardObservation,
    pub surface: Surface,
}

impl PipelineOutputs {
    pub fn record(&self) -> ReportRecord {
        ReportRecord::from(&self.report)
    }
}

/// Projection origin: configured, or the mean checklist location.
fn grid_for(config: &PipelineConfig, observations: &[Observation]) -> Result<HexGrid> {
    let (lat, lon) = match config.grid.center {
        Some(center) => center,
        None => {
            let located: Vec<&Observation> = observations
                .iter()
                .filter(|o| o.latitude.is_finite() && o.longitude.is_finite())
                .collect();
            if located.is_empty() {
                return Err(PipelineError::insufficient("checklists with a location", 1, 0));
            }
            let n = located.len() as f64;
            (
                located.iter().map(|o| o.latitude).sum::<f64>() / n,
                located.iter().map(|o| o.longitude).sum::<f64>() / n,
            )
        }
    };
    HexGrid::centered_at(config.grid.spacing_km, lat, lon)
}

/// Run every stage on validated inputs.
pub fn run(
    config: &PipelineConfig,
    schema: &HabitatSchema,
    observations: &[Observation],
    cells: &[PredictionCell],
) -> Result<PipelineOutputs> {
    config.validate()?;
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(config.seed);

    let features = match &config.features {
        Some(names) => FeatureSet::resolve(names.as_slice(), schema)?,
        None => FeatureSet::all(schema)?,
    };
    tracing::info!(
        "Pipeline: {} checklists, {} prediction cells, {} covariates (seed {})",
        observations.len(),
        cells.len(),
        features.len(),
        config.seed
    );
    if observations.is_empty() {
        return Err(PipelineError::insufficient("input checklists", 2, 0));
    }

    // 1-2. Spatiotemporal subsampling. Incomplete records would take a
    // stratum slot and then be dropped by the split.
    let grid = grid_for(config, observations)?;
    let complete = features.complete_cases(observations);
    let subsampled = subsample_stratified(&complete, &grid, &mut rng);

    // 3. Split
    let split = train_test_split(&subsampled, &features, config.split.train_fraction, &mut rng)?;

    // 4. Forest
    let x_train = features.matrix(&split.train);
    let y_train = FeatureSet::labels(&split.train);
    let forest = BalancedRandomForest::fit(&x_train, &y_train, features.names(), &config.forest, &mut rng)?;

    // 5. Calibration on in-sample predictions
    let train_predictions = forest.predict_batch(&x_train);
    let calibration = CalibrationCurve::fit(&train_predictions, &y_train, &config.calibration)?;

    // 6. Evaluation
    let x_test = features.matrix(&split.test);
    let y_test = FeatureSet::labels(&split.test);
    let raw_test = forest.predict_batch(&x_test);
    let (calibrated_test, calibration_clipping) = calibration.predict_batch(&raw_test);
    calibration_clipping.log("test-set calibration");
    let report = evaluation::evaluate(&raw_test, &calibrated_test, &y_test, &config.evaluation)?;

    // 7. Importance and partial dependence
    let importance = analysis::importance(&forest);
    let scale = ResponseScale::Calibrated(&calibration);
    let mut partial_dependence = Vec::new();
    for row in importance.iter().take(config.partial_dependence.max_covariates) {
        let pd = PartialDependence::new(
            &forest,
            scale,
            &row.covariate,
            &x_train,
            &config.partial_dependence,
            &mut rng,
        )?;
        partial_dependence.extend(pd.rows());
    }

    let peak = if features.effort_index(EffortField::TimeObservationsStarted).is_some() {
        Some(analysis::peak_time(
            &forest,
            scale,
            &x_train,
            &config.partial_dependence,
            &config.peak,
            &mut rng,
        )?)
    } else {
        tracing::debug!("No time-of-day covariate; standard observation keeps its configured start time");
        None
    };
    let standard_observation = match peak {
        Some(peak) => config.standard_observation.at_hour(peak.hour),
        None => config.standard_observation,
    };

    // 8. Surface
    let predictor = SurfacePredictor::new(&forest, &calibration, &features, &standard_observation)?;
    let surface = predictor.predict(cells);

    let counts = StageCounts {
        input: observations.len(),
        subsampled: subsampled.len(),
        train: split.train.len(),
        test: split.test.len(),
        prediction_cells: cells.len(),
    };
    tracing::info!(
        "Pipeline finished in {:.2}s: {} -> {} subsampled -> {}/{} train/test",
        start.elapsed().as_secs_f64(),
        counts.input,
        counts.subsampled,
        counts.train,
        counts.test
    );

    Ok(PipelineOutputs {
        counts,
        forest,
        calibration,
        calibration_clipping,
        report,
        importance,
        partial_dependence,
        peak,
        standard_observation,
        surface,
    })
}
