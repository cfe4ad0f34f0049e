//! Balanced Classifier Trainer
//!
//! - `tree`: CART probability trees split on Gini decrease
//! - `ensemble`: class-balanced bootstrap forest, parallel over trees

pub mod tree;
pub mod ensemble;

pub use tree::{FittedTree, Node, ProbabilityTree, TreeParams};
pub use ensemble::{balanced_bootstrap, BalancedRandomForest, ForestConfig};
