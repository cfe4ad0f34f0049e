//! Pipeline error taxonomy
//!
//! Data-shape problems found while preparing the training data are fatal and
//! abort the run. Calibrated values that leave [0, 1] are not errors: they are
//! clipped, counted in [`ClipDiagnostics`], and logged as [`PipelineError::OutOfRange`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A partition, stratum or class is empty or too small to fit/evaluate.
    #[error("insufficient data in {context}: need at least {required}, got {actual}")]
    InsufficientData {
        context: String,
        required: usize,
        actual: usize,
    },

    /// Zero variance in the outcome of a training set.
    #[error("degenerate outcome in {context}: positive fraction is {positive_fraction}")]
    DegenerateClass {
        context: String,
        positive_fraction: f64,
    },

    /// A requested covariate is not part of the record schema.
    #[error("missing covariate '{name}'. Available covariates: {available:?}")]
    MissingCovariate { name: String, available: Vec<String> },

    /// Calibrated values required clipping into [0, 1]. Recorded, never fatal.
    #[error("{count} of {total} calibrated values fell outside [0, 1] and were clipped")]
    OutOfRange { count: usize, total: usize },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Input table does not match the expected schema.
    #[error("schema error: {0}")]
    Schema(String),
}

impl PipelineError {
    pub(crate) fn insufficient(context: impl Into<String>, required: usize, actual: usize) -> Self {
        PipelineError::InsufficientData {
            context: context.into(),
            required,
            actual,
        }
    }
}

/// Count of calibrated values that needed clipping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ClipDiagnostics {
    pub clipped: usize,
    pub total: usize,
}

impl ClipDiagnostics {
    pub fn record(&mut self, was_clipped: bool) {
        self.total += 1;
        if was_clipped {
            self.clipped += 1;
        }
    }

    pub fn merge(self, other: ClipDiagnostics) -> ClipDiagnostics {
        ClipDiagnostics {
            clipped: self.clipped + other.clipped,
            total: self.total + other.total,
        }
    }

    /// `OutOfRange` describing the clipped values, if any were clipped.
    pub fn as_warning(&self) -> Option<PipelineError> {
        (self.clipped > 0).then(|| PipelineError::OutOfRange {
            count: self.clipped,
            total: self.total,
        })
    }

    /// Emit a `warn!` if anything was clipped.
    pub fn log(&self, stage: &str) {
        if let Some(warning) = self.as_warning() {
            tracing::warn!("{}: {}", stage, warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_diagnostics_merge_and_warning() {
        let mut a = ClipDiagnostics::default();
        a.record(false);
        a.record(true);
        let mut b = ClipDiagnostics::default();
        b.record(true);

        let merged = a.merge(b);
        assert_eq!(merged, ClipDiagnostics { clipped: 2, total: 3 });

        match merged.as_warning() {
            Some(PipelineError::OutOfRange { count, total }) => {
                assert_eq!(count, 2);
                assert_eq!(total, 3);
            }
            other => panic!("expected OutOfRange, got {:?}", other),
        }
        assert!(ClipDiagnostics::default().as_warning().is_none());
    }

    #[test]
    fn test_error_messages() {
        let err = PipelineError::insufficient("test partition", 1, 0);
        assert_eq!(
            err.to_string(),
            "insufficient data in test partition: need at least 1, got 0"
        );
    }
}
