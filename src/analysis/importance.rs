//! Covariate importance table
//!
//! Scores are the forest's accumulated Gini decrease. A larger score means a
//! larger contribution to the fit; it says nothing about the sign of the effect.

use serde::Serialize;

use crate::forest::BalancedRandomForest;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportanceRow {
    pub covariate: String,
    pub score: f64,
}

/// Importance per covariate, highest score first (name breaks ties).
pub fn importance(forest: &BalancedRandomForest) -> Vec<ImportanceRow> {
    let mut rows: Vec<ImportanceRow> = forest
        .feature_names()
        .iter()
        .zip(forest.impurity_importance())
        .map(|(name, &score)| ImportanceRow {
            covariate: name.clone(),
            score,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.covariate.cmp(&b.covariate))
    });

    if let Some(top) = rows.first() {
        tracing::debug!("Most important covariate: {} ({:.4})", top.covariate, top.score);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::ForestConfig;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_signal_covariate_ranks_first() {
        let mut rng = StdRng::seed_from_u64(11);
        let x: Vec<Vec<f64>> = (0..400)
            .map(|_| vec![rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()])
            .collect();
        let y: Vec<bool> = x.iter().map(|row| row[1] > 0.6).collect();
        let names = vec!["noise_a".to_string(), "signal".to_string(), "noise_b".to_string()];
        let config = ForestConfig {
            n_trees: 50,
            ..ForestConfig::default()
        };
        let forest = BalancedRandomForest::fit(&x, &y, &names, &config, &mut rng).unwrap();

        let table = importance(&forest);
        assert_eq!(table.len(), 3);
        assert_eq!(table[0].covariate, "signal");
        assert!(table.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
