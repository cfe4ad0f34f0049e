//! Pipeline configuration
//!
//! Loaded from JSON; every section has defaults, so `{}` is a valid config.
//! `validate()` runs once before any stage.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::analysis::{PartialDependenceConfig, PeakConfig};
use crate::calibration::CalibrationConfig;
use crate::error::{PipelineError, Result};
use crate::evaluation::EvaluationConfig;
use crate::forest::ForestConfig;
use crate::prediction::StandardObservation;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub spacing_km: f64,
    /// Projection origin; `None` uses the mean checklist location
    pub center: Option<(f64, f64)>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            spacing_km: 5.0,
            center: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train_fraction: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self { train_fraction: 0.8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Seeds every stochastic stage
    pub seed: u64,
    pub grid: GridConfig,
    pub split: SplitConfig,
    pub forest: ForestConfig,
    pub calibration: CalibrationConfig,
    pub evaluation: EvaluationConfig,
    pub partial_dependence: PartialDependenceConfig,
    pub peak: PeakConfig,
    pub standard_observation: StandardObservation,
    /// Model covariates; `None` uses every effort and habitat column
    pub features: Option<Vec<String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            grid: GridConfig::default(),
            split: SplitConfig::default(),
            forest: ForestConfig::default(),
            calibration: CalibrationConfig::default(),
            evaluation: EvaluationConfig::default(),
            partial_dependence: PartialDependenceConfig::default(),
            peak: PeakConfig::default(),
            standard_observation: StandardObservation::default(),
            features: None,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Config(msg));

        if !(self.grid.spacing_km.is_finite() && self.grid.spacing_km > 0.0) {
            return fail(format!("grid.spacing_km must be positive, got {}", self.grid.spacing_km));
        }
        if let Some((lat, lon)) = self.grid.center {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                return fail(format!("grid center ({}, {}) is not a valid coordinate", lat, lon));
            }
        }
        let p = self.split.train_fraction;
        if !(p > 0.0 && p < 1.0) {
            return fail(format!("split.train_fraction must be in (0, 1), got {}", p));
        }
        if self.forest.n_trees == 0 {
            return fail("forest.n_trees must be at least 1".into());
        }
        if self.forest.mtry == Some(0) {
            return fail("forest.mtry must be at least 1".into());
        }
        if self.forest.min_node_size == 0 {
            return fail("forest.min_node_size must be at least 1".into());
        }
        if self.calibration.n_basis < 4 {
            return fail(format!("calibration.n_basis must be at least 4, got {}", self.calibration.n_basis));
        }
        if !(self.calibration.penalty >= 0.0) {
            return fail(format!("calibration.penalty must be non-negative, got {}", self.calibration.penalty));
        }
        if self.evaluation.threshold_steps == 0 {
            return fail("evaluation.threshold_steps must be at least 1".into());
        }
        if self.partial_dependence.grid_size == 0 {
            return fail("partial_dependence.grid_size must be at least 1".into());
        }
        if self.peak.grid_size == 0 {
            return fail("peak.grid_size must be at least 1".into());
        }
        if !(self.peak.bin_width_hours > 0.0 && self.peak.bin_width_hours <= 24.0) {
            return fail(format!(
                "peak.bin_width_hours must be in (0, 24], got {}",
                self.peak.bin_width_hours
            ));
        }
        if !(0.0..1.0).contains(&self.peak.min_bin_share) {
            return fail(format!("peak.min_bin_share must be in [0, 1), got {}", self.peak.min_bin_share));
        }
        let standard = &self.standard_observation;
        if !(1.0..=366.0).contains(&standard.day_of_year) {
            return fail(format!(
                "standard_observation.day_of_year must be in 1-366, got {}",
                standard.day_of_year
            ));
        }
        if !(0.0..=24.0).contains(&standard.time_observations_started) {
            return fail(format!(
                "standard_observation.time_observations_started must be in 0-24, got {}",
                standard.time_observations_started
            ));
        }
        if matches!(&self.features, Some(names) if names.is_empty()) {
            return fail("features must name at least one covariate".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.forest.n_trees, 500);
        assert_eq!(config.peak.grid_size, 300);
        assert_eq!(config.standard_observation.day_of_year, 166.0);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"seed": 42, "grid": {{"spacing_km": 3.0}}, "partial_dependence": {{"grid": "quantile"}}}}"#
        )
        .unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.grid.spacing_km, 3.0);
        assert_eq!(config.split.train_fraction, 0.8);
        assert_eq!(config.partial_dependence.grid, crate::analysis::GridKind::Quantile);
    }

    #[test]
    fn test_rejects_bad_train_fraction() {
        let mut config = PipelineConfig::default();
        config.split.train_fraction = 1.0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_rejects_empty_feature_list() {
        let config = PipelineConfig {
            features: Some(Vec::new()),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
