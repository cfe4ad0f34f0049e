//! Balanced random forest
//!
//! Every tree is grown on a class-balanced bootstrap: with `f` the training
//! detection rate and `n` the training size, `f * n` rows are drawn with
//! replacement from the detections and `f * n` from the non-detections, so
//! both classes are equally represented in expectation whatever `f` is.
//!
//! Trees are grown in parallel. Each tree gets its own seed, drawn up front
//! from the caller's RNG, and per-tree results are reduced in tree order, so
//! the fitted forest does not depend on the number of threads.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::{ProbabilityTree, TreeParams};
use crate::data::Observation;
use crate::error::{PipelineError, Result};
use crate::features::FeatureSet;

/// Forest hyper-parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    /// Candidate covariates per split; `None` means floor(sqrt(p))
    pub mtry: Option<usize>,
    pub min_node_size: usize,
    pub max_depth: Option<usize>,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 500,
            mtry: None,
            min_node_size: 10,
            max_depth: None,
        }
    }
}

impl ForestConfig {
    fn tree_params(&self, n_features: usize) -> TreeParams {
        let default_mtry = ((n_features as f64).sqrt().floor() as usize).max(1);
        TreeParams {
            mtry: self.mtry.unwrap_or(default_mtry).clamp(1, n_features),
            min_node_size: self.min_node_size,
            max_depth: self.max_depth,
        }
    }
}

/// Draw `per_class` rows with replacement from each class.
pub fn balanced_bootstrap<R: Rng + ?Sized>(
    positives: &[usize],
    negatives: &[usize],
    per_class: usize,
    rng: &mut R,
) -> Vec<usize> {
    let mut sample = Vec::with_capacity(2 * per_class);
    for class in [positives, negatives] {
        if class.is_empty() {
            continue;
        }
        sample.extend((0..per_class).map(|_| class[rng.gen_range(0..class.len())]));
    }
    sample
}

/// Fitted ensemble. Holds no reference to its training data.
#[derive(Debug, Clone, Serialize)]
pub struct BalancedRandomForest {
    trees: Vec<ProbabilityTree>,
    feature_names: Vec<String>,
    /// Gini decrease per covariate, averaged over trees
    importance: Vec<f64>,
    positive_fraction: f64,
    per_class_draws: usize,
}

impl BalancedRandomForest {
    /// Fit on a row-major covariate matrix.
    pub fn fit<R: Rng + ?Sized>(
        x: &[Vec<f64>],
        y: &[bool],
        feature_names: &[String],
        config: &ForestConfig,
        rng: &mut R,
    ) -> Result<Self> {
        let n = y.len();
        if n == 0 {
            return Err(PipelineError::insufficient("training set", 2, 0));
        }
        if x.len() != n {
            return Err(PipelineError::Schema(format!(
                "{} covariate rows for {} outcomes",
                x.len(),
                n
            )));
        }
        let n_features = feature_names.len();
        if n_features == 0 {
            return Err(PipelineError::insufficient("covariates", 1, 0));
        }
        if let Some(bad) = x.iter().position(|row| row.len() != n_features) {
            return Err(PipelineError::Schema(format!(
                "row {} has {} covariates, expected {}",
                bad,
                x[bad].len(),
                n_features
            )));
        }
        if config.n_trees == 0 {
            return Err(PipelineError::Config("n_trees must be at least 1".into()));
        }

        let positives: Vec<usize> = (0..n).filter(|&i| y[i]).collect();
        let negatives: Vec<usize> = (0..n).filter(|&i| !y[i]).collect();
        let positive_fraction = positives.len() as f64 / n as f64;
        if positives.is_empty() || negatives.is_empty() {
            return Err(PipelineError::DegenerateClass {
                context: "training set".into(),
                positive_fraction,
            });
        }

        // f * n drawn from each class
        let per_class = ((positive_fraction * n as f64).round() as usize).max(1);
        let params = config.tree_params(n_features);

        tracing::info!(
            "Fitting {} trees on {} checklists ({:.2}% detections, {} draws per class, mtry = {})",
            config.n_trees,
            n,
            100.0 * positive_fraction,
            per_class,
            params.mtry
        );

        let seeds: Vec<u64> = (0..config.n_trees).map(|_| rng.gen()).collect();
        let fitted: Vec<_> = seeds
            .par_iter()
            .map(|&seed| {
                let mut tree_rng = StdRng::seed_from_u64(seed);
                let sample = balanced_bootstrap(&positives, &negatives, per_class, &mut tree_rng);
                ProbabilityTree::fit(x, y, &sample, &params, &mut tree_rng)
            })
            .collect();

        let mut importance = vec![0.0; n_features];
        for tree in &fitted {
            for (total, decrease) in importance.iter_mut().zip(&tree.impurity_decrease) {
                *total += decrease;
            }
        }
        let n_trees = fitted.len() as f64;
        importance.iter_mut().for_each(|v| *v /= n_trees);

        let trees: Vec<ProbabilityTree> = fitted.into_iter().map(|f| f.tree).collect();
        tracing::debug!(
            "Forest grown: {} nodes, mean depth {:.1}",
            trees.iter().map(ProbabilityTree::n_nodes).sum::<usize>(),
            trees.iter().map(|t| t.depth() as f64).sum::<f64>() / n_trees
        );

        Ok(Self {
            trees,
            feature_names: feature_names.to_vec(),
            importance,
            positive_fraction,
            per_class_draws: per_class,
        })
    }

    /// Fit on checklists using the resolved covariates.
    pub fn fit_observations<R: Rng + ?Sized>(
        observations: &[Observation],
        features: &FeatureSet,
        config: &ForestConfig,
        rng: &mut R,
    ) -> Result<Self> {
        let x = features.matrix(observations);
        let y = FeatureSet::labels(observations);
        Self::fit(&x, &y, features.names(), config, rng)
    }

    /// P(detected): mean of the tree probabilities, always in [0, 1].
    pub fn predict(&self, row: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|tree| tree.predict(row)).sum();
        (total / self.trees.len() as f64).clamp(0.0, 1.0)
    }

    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.par_iter().map(|row| self.predict(row)).collect()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Averaged Gini decrease per covariate, in covariate order
    pub fn impurity_importance(&self) -> &[f64] {
        &self.importance
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Detection rate of the training set
    pub fn positive_fraction(&self) -> f64 {
        self.positive_fraction
    }

    /// Rows drawn from each class per tree
    pub fn per_class_draws(&self) -> usize {
        self.per_class_draws
    }
}
