//! Monotonic Calibrator
//!
//! Regresses observed detection (0/1) on the forest's predicted probability
//! with a cubic B-spline whose coefficients are constrained to be
//! non-decreasing, which makes the fitted curve non-decreasing. The
//! balanced bootstrap shifts the forest's absolute probabilities; this curve
//! moves them back toward observed frequencies while keeping their ranking.
//!
//! Fitting reparameterises the coefficients as an intercept plus
//! non-negative increments and solves the penalised least-squares problem
//! with an active-set method. A second-difference penalty on the
//! coefficients keeps the curve smooth.
//!
//! Outside the fitted range the curve continues linearly with its boundary
//! slope, so raw values can leave [0, 1]; [`CalibrationCurve::predict`]
//! clips them.

use serde::{Deserialize, Serialize};

use crate::error::{ClipDiagnostics, PipelineError, Result};

const DEGREE: usize = 3;
const MAX_OUTER: usize = 10;
const TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Number of cubic B-spline basis functions (>= 4)
    pub n_basis: usize,
    /// Weight of the second-difference smoothness penalty
    pub penalty: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            n_basis: 6,
            penalty: 0.01,
        }
    }
}

/// Fitted non-decreasing calibration curve.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationCurve {
    knots: Vec<f64>,
    coefficients: Vec<f64>,
    domain: (f64, f64),
    n_samples: usize,
}

impl CalibrationCurve {
    /// Fit on (predicted probability, observed outcome) pairs.
    pub fn fit(predictions: &[f64], outcomes: &[bool], config: &CalibrationConfig) -> Result<Self> {
        if predictions.len() != outcomes.len() {
            return Err(PipelineError::Schema(format!(
                "{} predictions for {} outcomes",
                predictions.len(),
                outcomes.len()
            )));
        }
        if config.n_basis < DEGREE + 1 {
            return Err(PipelineError::Config(format!(
                "calibration needs at least {} basis functions, got {}",
                DEGREE + 1,
                config.n_basis
            )));
        }
        if !(config.penalty >= 0.0 && config.penalty.is_finite()) {
            return Err(PipelineError::Config(format!(
                "calibration penalty must be non-negative, got {}",
                config.penalty
            )));
        }

        let pairs: Vec<(f64, f64)> = predictions
            .iter()
            .zip(outcomes)
            .filter(|(p, _)| p.is_finite())
            .map(|(&p, &o)| (p, if o { 1.0 } else { 0.0 }))
            .collect();

        let lo = pairs.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let hi = pairs.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
        if pairs.len() < 2 || !(hi - lo > 1e-9) {
            return Err(PipelineError::insufficient(
                "calibration (distinct predicted values)",
                2,
                if pairs.is_empty() { 0 } else { 1 },
            ));
        }

        let k = config.n_basis;
        let knots = clamped_knots(lo, hi, k);
        let n = pairs.len() as f64;

        // Z = B * T, T lower-triangular ones: Z[.., j] = sum_{m >= j} B[.., m]
        let mut gram = vec![vec![0.0; k]; k];
        let mut rhs = vec![0.0; k];
        for &(p, y) in &pairs {
            let z = cumulative_from_right(&basis(&knots, k, p));
            for i in 0..k {
                rhs[i] += z[i] * y / n;
                for j in 0..k {
                    gram[i][j] += z[i] * z[j] / n;
                }
            }
        }

        // Second differences of beta are first differences of the increments
        for i in 1..k.saturating_sub(1) {
            let (a, b) = (i, i + 1);
            gram[a][a] += config.penalty;
            gram[b][b] += config.penalty;
            gram[a][b] -= config.penalty;
            gram[b][a] -= config.penalty;
        }

        let theta = solve_nonnegative_increments(&gram, &rhs);

        let mut coefficients = Vec::with_capacity(k);
        let mut running = 0.0;
        for value in &theta {
            running += value;
            coefficients.push(running);
        }

        let curve = Self {
            knots,
            coefficients,
            domain: (lo, hi),
            n_samples: pairs.len(),
        };

        tracing::info!(
            "Calibration fitted on {} predictions over [{:.3}, {:.3}]: g(lo) = {:.3}, g(hi) = {:.3}",
            curve.n_samples,
            lo,
            hi,
            curve.raw(lo),
            curve.raw(hi)
        );
        Ok(curve)
    }

    /// Unclipped curve value `g(p)`
    pub fn raw(&self, p: f64) -> f64 {
        let (lo, hi) = self.domain;
        if p < lo {
            return self.eval(lo) + self.slope_at_lo() * (p - lo);
        }
        if p > hi {
            return self.eval(hi) + self.slope_at_hi() * (p - hi);
        }
        self.eval(p)
    }

    /// `clip(g(p), 0, 1)`
    pub fn predict(&self, p: f64) -> f64 {
        self.raw(p).clamp(0.0, 1.0)
    }

    /// Clipped predictions plus a count of values that needed clipping
    pub fn predict_batch(&self, predictions: &[f64]) -> (Vec<f64>, ClipDiagnostics) {
        let mut diagnostics = ClipDiagnostics::default();
        let calibrated = predictions
            .iter()
            .map(|&p| {
                let raw = self.raw(p);
                let clipped = raw.clamp(0.0, 1.0);
                diagnostics.record(clipped != raw);
                clipped
            })
            .collect();
        (calibrated, diagnostics)
    }

    /// Range of predicted probabilities the curve was fitted on
    pub fn domain(&self) -> (f64, f64) {
        self.domain
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    fn eval(&self, p: f64) -> f64 {
        let k = self.coefficients.len();
        basis(&self.knots, k, p)
            .iter()
            .zip(&self.coefficients)
            .map(|(b, c)| b * c)
            .sum()
    }

    fn slope_at_lo(&self) -> f64 {
        let t = &self.knots;
        let c = &self.coefficients;
        DEGREE as f64 * (c[1] - c[0]) / (t[DEGREE + 1] - t[1])
    }

    fn slope_at_hi(&self) -> f64 {
        let t = &self.knots;
        let c = &self.coefficients;
        let k = c.len();
        DEGREE as f64 * (c[k - 1] - c[k - 2]) / (t[k + DEGREE - 1] - t[k - 1])
    }
}

/// Clamped cubic knot vector with evenly spaced interior knots
fn clamped_knots(lo: f64, hi: f64, n_basis: usize) -> Vec<f64> {
    let n_interior = n_basis - DEGREE - 1;
    let mut knots = vec![lo; DEGREE + 1];
    let step = (hi - lo) / (n_interior + 1) as f64;
    knots.extend((1..=n_interior).map(|i| lo + step * i as f64));
    knots.extend(std::iter::repeat(hi).take(DEGREE + 1));
    knots
}

/// All `n_basis` B-spline values at `x` (clamped to the knot range)
fn basis(knots: &[f64], n_basis: usize, x: f64) -> Vec<f64> {
    let lo = knots[0];
    let hi = knots[knots.len() - 1];
    let x = x.clamp(lo, hi);

    let mut span = DEGREE;
    while span < n_basis - 1 && knots[span + 1] <= x {
        span += 1;
    }

    let mut n = [0.0; DEGREE + 1];
    let mut left = [0.0; DEGREE + 1];
    let mut right = [0.0; DEGREE + 1];
    n[0] = 1.0;
    for j in 1..=DEGREE {
        left[j] = x - knots[span + 1 - j];
        right[j] = knots[span + j] - x;
        let mut saved = 0.0;
        for r in 0..j {
            let temp = n[r] / (right[r + 1] + left[j - r]);
            n[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        n[j] = saved;
    }

    let mut out = vec![0.0; n_basis];
    for (r, value) in n.iter().enumerate() {
        out[span - DEGREE + r] = *value;
    }
    out
}

fn cumulative_from_right(values: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    let mut running = 0.0;
    for i in (0..values.len()).rev() {
        running += values[i];
        out[i] = running;
    }
    out
}

/// Minimise 0.5 θ'Aθ - b'θ with θ[0] free and θ[1..] >= 0.
///
/// Lawson-Hanson active set on the quadratic form: increments enter the
/// free set by largest negative gradient and leave it when a step would
/// make them negative.
fn solve_nonnegative_increments(a: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let k = b.len();
    let mut free = vec![false; k];
    free[0] = true;
    let mut theta = solve_on(a, b, &free);

    for _ in 0..MAX_OUTER * k {
        let gradient: Vec<f64> = (0..k)
            .map(|j| b[j] - (0..k).map(|i| a[j][i] * theta[i]).sum::<f64>())
            .collect();
        let entering = (1..k)
            .filter(|&j| !free[j] && gradient[j] > TOLERANCE)
            .max_by(|&i, &j| gradient[i].total_cmp(&gradient[j]));
        let Some(entering) = entering else {
            break;
        };
        free[entering] = true;

        for _ in 0..k {
            let candidate = solve_on(a, b, &free);
            let blocking: Vec<usize> = (1..k).filter(|&j| free[j] && candidate[j] <= 0.0).collect();
            if blocking.is_empty() {
                theta = candidate;
                break;
            }

            let alpha = blocking
                .iter()
                .map(|&j| theta[j] / (theta[j] - candidate[j]))
                .fold(1.0_f64, f64::min);
            for j in 0..k {
                theta[j] += alpha * (candidate[j] - theta[j]);
            }
            for j in 1..k {
                if free[j] && theta[j] <= TOLERANCE {
                    free[j] = false;
                    theta[j] = 0.0;
                }
            }
        }
    }

    tracing::debug!(
        "Calibration increments: {} of {} active",
        (1..k).filter(|&j| theta[j] > 0.0).count(),
        k - 1
    );
    theta
}

/// Unconstrained minimiser over the free coordinates, others held at zero
fn solve_on(a: &[Vec<f64>], b: &[f64], free: &[bool]) -> Vec<f64> {
    let index: Vec<usize> = (0..b.len()).filter(|&j| free[j]).collect();
    let m = index.len();
    let trace: f64 = index.iter().map(|&j| a[j][j]).sum();
    let ridge = 1e-12 * trace.max(1.0);

    // Augmented system [A_ff | b_f]
    let mut system: Vec<Vec<f64>> = index
        .iter()
        .enumerate()
        .map(|(r, &i)| {
            let mut row: Vec<f64> = index.iter().map(|&j| a[i][j]).collect();
            row[r] += ridge;
            row.push(b[i]);
            row
        })
        .collect();

    // Gaussian elimination with partial pivoting
    for col in 0..m {
        let pivot = (col..m)
            .max_by(|&x, &y| system[x][col].abs().total_cmp(&system[y][col].abs()))
            .unwrap_or(col);
        system.swap(col, pivot);
        let diag = system[col][col];
        if diag.abs() < f64::MIN_POSITIVE {
            continue;
        }
        for row in (col + 1)..m {
            let factor = system[row][col] / diag;
            for c in col..=m {
                system[row][c] -= factor * system[col][c];
            }
        }
    }

    let mut solution = vec![0.0; m];
    for row in (0..m).rev() {
        let tail: f64 = ((row + 1)..m).map(|c| system[row][c] * solution[c]).sum();
        let diag = system[row][row];
        solution[row] = if diag.abs() < f64::MIN_POSITIVE {
            0.0
        } else {
            (system[row][m] - tail) / diag
        };
    }

    let mut theta = vec![0.0; b.len()];
    for (value, &j) in solution.iter().zip(&index) {
        theta[j] = *value;
    }
    theta
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Outcomes drawn with P(y) = p^2: forest over-predicts low probabilities
    fn biased_sample(n: usize, seed: u64) -> (Vec<f64>, Vec<bool>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let predictions: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
        let outcomes = predictions.iter().map(|p| rng.gen::<f64>() < p * p).collect();
        (predictions, outcomes)
    }

    #[test]
    fn test_basis_is_partition_of_unity() {
        let knots = clamped_knots(0.0, 1.0, 7);
        assert_eq!(knots.len(), 11);
        for i in 0..=20 {
            let x = i as f64 / 20.0;
            let b = basis(&knots, 7, x);
            assert_relative_eq!(b.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
            assert!(b.iter().all(|&v| v >= -1e-15));
        }
    }

    #[test]
    fn test_curve_is_monotone() {
        let (predictions, outcomes) = biased_sample(2000, 1);
        let curve = CalibrationCurve::fit(&predictions, &outcomes, &CalibrationConfig::default()).unwrap();

        let mut previous = f64::NEG_INFINITY;
        for i in -50..=150 {
            let p = i as f64 / 100.0;
            let g = curve.raw(p);
            assert!(g >= previous - 1e-12, "g({}) = {} < {}", p, g, previous);
            previous = g;
        }
        for pair in curve.coefficients().windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn test_monotone_even_when_data_decrease() {
        // Outcome rate falls with the prediction: best monotone fit is flat
        let mut rng = StdRng::seed_from_u64(2);
        let predictions: Vec<f64> = (0..1000).map(|_| rng.gen_range(0.0..1.0)).collect();
        let outcomes: Vec<bool> = predictions.iter().map(|p| rng.gen::<f64>() < 1.0 - p).collect();

        let curve = CalibrationCurve::fit(&predictions, &outcomes, &CalibrationConfig::default()).unwrap();
        let (g0, g1) = (curve.raw(0.0), curve.raw(1.0));
        assert!(g1 >= g0 - 1e-12);
        assert_relative_eq!(g0, 0.5, epsilon = 0.06);
    }

    #[test]
    fn test_curve_tracks_true_relationship() {
        let (predictions, outcomes) = biased_sample(5000, 3);
        let curve = CalibrationCurve::fit(&predictions, &outcomes, &CalibrationConfig::default()).unwrap();

        for p in [0.2, 0.5, 0.8] {
            assert_relative_eq!(curve.predict(p), p * p, epsilon = 0.08);
        }
    }

    #[test]
    fn test_predict_is_clipped_raw() {
        let (predictions, outcomes) = biased_sample(1000, 4);
        let narrow: Vec<f64> = predictions.iter().map(|p| 0.3 + 0.4 * p).collect();
        let curve = CalibrationCurve::fit(&narrow, &outcomes, &CalibrationConfig::default()).unwrap();

        for i in -20..=120 {
            let p = i as f64 / 100.0;
            assert_eq!(curve.predict(p), curve.raw(p).max(0.0).min(1.0));
        }

        // Far outside the fitted range the linear extension leaves [0, 1]
        let (clipped, diagnostics) = curve.predict_batch(&[-10.0, 0.5, 10.0]);
        assert!(clipped.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(diagnostics.total, 3);
        assert!(diagnostics.clipped >= 1);
    }

    #[test]
    fn test_constant_predictions_are_insufficient() {
        let result = CalibrationCurve::fit(&[0.4; 10], &[true; 10], &CalibrationConfig::default());
        assert!(matches!(result, Err(PipelineError::InsufficientData { .. })));
    }

    #[test]
    fn test_too_few_basis_functions_is_config_error() {
        let (predictions, outcomes) = biased_sample(100, 5);
        let config = CalibrationConfig { n_basis: 3, penalty: 0.0 };
        assert!(matches!(
            CalibrationCurve::fit(&predictions, &outcomes, &config),
            Err(PipelineError::Config(_))
        ));
    }
}
