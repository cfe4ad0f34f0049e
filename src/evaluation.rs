//! Evaluator
//!
//! Scores held-out predictions: mean squared error, AUC, and sensitivity,
//! specificity and Kappa at the threshold that maximises Kappa. Raw and
//! calibrated predictions are scored independently and may end up with
//! different thresholds.
//!
//! A checklist is predicted as a detection when `p >= threshold`.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::utils::average_ranks;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Candidate thresholds are i / (steps + 1) for i in 1..=steps
    pub threshold_steps: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { threshold_steps: 99 }
    }
}

/// 2x2 confusion counts at one threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Confusion {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl Confusion {
    pub fn at(predictions: &[f64], observed: &[bool], threshold: f64) -> Self {
        let mut counts = Confusion::default();
        for (&p, &obs) in predictions.iter().zip(observed) {
            match (p >= threshold, obs) {
                (true, true) => counts.true_positive += 1,
                (true, false) => counts.false_positive += 1,
                (false, false) => counts.true_negative += 1,
                (false, true) => counts.false_negative += 1,
            }
        }
        counts
    }

    fn total(&self) -> f64 {
        (self.true_positive + self.false_positive + self.true_negative + self.false_negative) as f64
    }

    pub fn sensitivity(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn specificity(&self) -> f64 {
        ratio(self.true_negative, self.true_negative + self.false_positive)
    }

    /// Cohen's Kappa; 0 when chance agreement is total
    pub fn kappa(&self) -> f64 {
        let n = self.total();
        if n == 0.0 {
            return 0.0;
        }
        let tp = self.true_positive as f64;
        let fp = self.false_positive as f64;
        let tn = self.true_negative as f64;
        let fneg = self.false_negative as f64;

        let observed = (tp + tn) / n;
        let expected = ((tp + fp) * (tp + fneg) + (fneg + tn) * (fp + tn)) / (n * n);
        if (1.0 - expected).abs() < f64::EPSILON {
            return 0.0;
        }
        (observed - expected) / (1.0 - expected)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        f64::NAN
    } else {
        num as f64 / den as f64
    }
}

/// Metrics for one set of predictions.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricSet {
    pub n: usize,
    pub mse: f64,
    pub auc: f64,
    pub threshold: f64,
    pub kappa: f64,
    pub sensitivity: f64,
    pub specificity: f64,
}

/// Raw and calibrated metrics side by side.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EvaluationReport {
    pub raw: MetricSet,
    pub calibrated: MetricSet,
}

/// Flat report record for downstream reporting.
///
/// Sensitivity, specificity, AUC and Kappa are those of the calibrated predictions.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReportRecord {
    pub mse_raw: f64,
    pub mse_calibrated: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub auc: f64,
    pub kappa: f64,
    pub threshold_raw: f64,
    pub threshold_calibrated: f64,
}

impl From<&EvaluationReport> for ReportRecord {
    fn from(report: &EvaluationReport) -> Self {
        ReportRecord {
            mse_raw: report.raw.mse,
            mse_calibrated: report.calibrated.mse,
            sensitivity: report.calibrated.sensitivity,
            specificity: report.calibrated.specificity,
            auc: report.calibrated.auc,
            kappa: report.calibrated.kappa,
            threshold_raw: report.raw.threshold,
            threshold_calibrated: report.calibrated.threshold,
        }
    }
}

pub fn mse(predictions: &[f64], observed: &[bool]) -> f64 {
    let total: f64 = predictions
        .iter()
        .zip(observed)
        .map(|(&p, &o)| {
            let y = if o { 1.0 } else { 0.0 };
            (p - y).powi(2)
        })
        .sum();
    total / predictions.len() as f64
}

/// Area under the ROC curve via the Mann-Whitney rank statistic
pub fn auc(predictions: &[f64], observed: &[bool]) -> Result<f64> {
    let n_pos = observed.iter().filter(|&&o| o).count();
    let n_neg = observed.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(PipelineError::insufficient(
            "AUC (both detections and non-detections)",
            1,
            n_pos.min(n_neg),
        ));
    }

    let ranks = average_ranks(predictions);
    let rank_sum: f64 = ranks
        .iter()
        .zip(observed)
        .filter(|(_, &o)| o)
        .map(|(r, _)| r)
        .sum();
    let n_pos_f = n_pos as f64;
    Ok((rank_sum - n_pos_f * (n_pos_f + 1.0) / 2.0) / (n_pos_f * n_neg as f64))
}

/// Threshold maximising Kappa over the candidate grid (lowest wins ties)
pub fn optimal_threshold(predictions: &[f64], observed: &[bool], steps: usize) -> (f64, Confusion) {
    let steps = steps.max(1);
    let mut best = (0.5, Confusion::at(predictions, observed, 0.5), f64::NEG_INFINITY);
    for i in 1..=steps {
        let threshold = i as f64 / (steps + 1) as f64;
        let confusion = Confusion::at(predictions, observed, threshold);
        let kappa = confusion.kappa();
        if kappa > best.2 {
            best = (threshold, confusion, kappa);
        }
    }
    (best.0, best.1)
}

pub fn metric_set(predictions: &[f64], observed: &[bool], config: &EvaluationConfig) -> Result<MetricSet> {
    if predictions.len() != observed.len() {
        return Err(PipelineError::Schema(format!(
            "{} predictions for {} observations",
            predictions.len(),
            observed.len()
        )));
    }
    if predictions.is_empty() {
        return Err(PipelineError::insufficient("evaluation set", 1, 0));
    }

    let (threshold, confusion) = optimal_threshold(predictions, observed, config.threshold_steps);
    Ok(MetricSet {
        n: predictions.len(),
        mse: mse(predictions, observed),
        auc: auc(predictions, observed)?,
        threshold,
        kappa: confusion.kappa(),
        sensitivity: confusion.sensitivity(),
        specificity: confusion.specificity(),
    })
}

/// Score raw and calibrated held-out predictions.
pub fn evaluate(
    raw: &[f64],
    calibrated: &[f64],
    observed: &[bool],
    config: &EvaluationConfig,
) -> Result<EvaluationReport> {
    let report = EvaluationReport {
        raw: metric_set(raw, observed, config)?,
        calibrated: metric_set(calibrated, observed, config)?,
    };

    tracing::info!(
        "Held-out metrics (n = {}): MSE raw {:.4} / calibrated {:.4}, AUC {:.3}, Kappa {:.3} at {:.2}",
        report.raw.n,
        report.raw.mse,
        report.calibrated.mse,
        report.calibrated.auc,
        report.calibrated.kappa,
        report.calibrated.threshold
    );
    Ok(report)
}
