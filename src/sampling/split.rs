//! Train/Test Splitter
//!
//! Each record goes to the training set independently with probability
//! `train_fraction`, so realised sizes are binomial around `p * N`.
//! Records missing a required covariate are dropped before the draw.

use rand::Rng;

use crate::data::Observation;
use crate::error::{PipelineError, Result};
use crate::features::FeatureSet;

#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub train: Vec<Observation>,
    pub test: Vec<Observation>,
}

/// Filter to complete cases, then assign each record to train or test.
pub fn train_test_split<R: Rng + ?Sized>(
    observations: &[Observation],
    features: &FeatureSet,
    train_fraction: f64,
    rng: &mut R,
) -> Result<TrainTestSplit> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(PipelineError::Config(format!(
            "train_fraction must be in (0, 1), got {}",
            train_fraction
        )));
    }

    let complete = features.complete_cases(observations);
    if complete.is_empty() {
        return Err(PipelineError::insufficient("complete checklists", 2, 0));
    }

    let (train, test): (Vec<Observation>, Vec<Observation>) = complete
        .into_iter()
        .partition(|_| rng.gen::<f64>() < train_fraction);

    if train.is_empty() {
        return Err(PipelineError::insufficient("training partition", 1, 0));
    }
    if test.is_empty() {
        return Err(PipelineError::insufficient("test partition", 1, 0));
    }

    tracing::info!(
        "Split {} checklists: {} train / {} test (p = {})",
        train.len() + test.len(),
        train.len(),
        test.len(),
        train_fraction
    );

    Ok(TrainTestSplit { train, test })
}
