//! Utility modules
//!
//! - Stats: ranks, quantiles, evenly spaced grids

pub mod stats;

pub use stats::{average_ranks, linspace, mean, quantile_sorted};
