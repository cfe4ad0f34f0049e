//! Importance / Partial-Dependence Analyzer
//!
//! - `importance`: covariate importance table from the forest's Gini decrease
//! - `partial_dependence`: lazy marginal-effect curves on raw or calibrated scale
//! - `peak`: peak time of day restricted to well-sampled hours

pub mod importance;
pub mod partial_dependence;
pub mod peak;

pub use importance::{importance, ImportanceRow};
pub use partial_dependence::{
    GridKind, PartialDependence, PartialDependenceConfig, PdPoint, PdRow, ResponseScale,
};
pub use peak::{hour_shares, peak_time, select_peak, PeakConfig, PeakTime};
