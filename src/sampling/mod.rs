//! Sampling stages applied before model fitting
//!
//! - `subsample`: one checklist per (detection, week, grid cell) stratum
//! - `split`: independent Bernoulli train/test assignment

pub mod subsample;
pub mod split;

pub use subsample::{strata, subsample_stratified, StratumKey};
pub use split::{train_test_split, TrainTestSplit};
