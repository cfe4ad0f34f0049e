//! Encounter-Rate Modelling
//!
//! Estimates the probability that a standardised citizen-science checklist
//! detects a species, from presence/absence checklists with effort and
//! habitat covariates.
//!
//! Pipeline stages, one module each:
//! - `grid`: equal-area hexagonal cells and (year, week) buckets
//! - `sampling/`: spatiotemporal subsampling and the train/test split
//! - `forest/`: class-balanced random forest of probability trees
//! - `calibration`: monotone spline calibration of forest probabilities
//! - `evaluation`: MSE, AUC, Kappa-optimal threshold, raw vs calibrated
//! - `analysis/`: importance, partial dependence, peak time of day
//! - `prediction`: encounter-rate surface for a standard checklist
//! - `pipeline`: runs the stages in order from one seed
//!
//! Supporting modules: `data` (typed schema and Polars ingestion),
//! `features` (covariate resolution), `config`, `error`, `output`,
//! `synthetic` (seeded test data) and `utils/`.

pub mod error;
pub mod utils;
pub mod data;
pub mod features;
pub mod grid;
pub mod sampling;
pub mod forest;
pub mod calibration;
pub mod evaluation;
pub mod analysis;
pub mod prediction;
pub mod config;
pub mod pipeline;
pub mod output;
pub mod synthetic;

// Re-export commonly used types
pub use error::{ClipDiagnostics, PipelineError, Result};
pub use data::{load_observations, load_prediction_grid, EffortCovariates, EffortField, HabitatSchema, Observation, PredictionCell};
pub use features::FeatureSet;
pub use grid::{CellId, HexGrid, TimeBucket};
pub use sampling::{subsample_stratified, train_test_split, StratumKey, TrainTestSplit};
pub use forest::{BalancedRandomForest, ForestConfig};
pub use calibration::{CalibrationConfig, CalibrationCurve};
pub use evaluation::{evaluate, EvaluationConfig, EvaluationReport, MetricSet, ReportRecord};
pub use analysis::{importance, peak_time, PartialDependence, PartialDependenceConfig, PeakConfig, ResponseScale};
pub use prediction::{StandardObservation, Surface, SurfacePredictor};
pub use config::PipelineConfig;
pub use pipeline::{run, PipelineOutputs};
