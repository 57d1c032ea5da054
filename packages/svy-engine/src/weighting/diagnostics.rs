// src/weighting/diagnostics.rs

use ndarray::ArrayView1;
use serde::Serialize;
use tracing::warn;

use crate::config::FactorBounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationKind {
    Greg,
    Raking,
}

/// Non-fatal findings of a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationWarning {
    NegativeFactors { units: Vec<usize> },
    ExtremeFactors { units: Vec<usize>, bounds: FactorBounds },
    NotConverged { iterations: usize, discrepancy: f64 },
}

/// Outcome of a calibration: whether the targets were met and how far the
/// weights had to move to meet them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceReport {
    pub method: CalibrationKind,
    pub converged: bool,
    pub iterations: usize,
    /// Largest relative gap between calibrated totals and targets.
    pub max_discrepancy: f64,
    pub factor_min: f64,
    pub factor_max: f64,
    pub warnings: Vec<CalibrationWarning>,
}

impl ConvergenceReport {
    /// Compare calibrated weights against their inputs.
    ///
    /// Factors are only defined for units with a positive input weight.
    pub fn assess(
        method: CalibrationKind,
        converged: bool,
        iterations: usize,
        max_discrepancy: f64,
        before: ArrayView1<f64>,
        after: ArrayView1<f64>,
        bounds: FactorBounds,
    ) -> Self {
        let mut factor_min = f64::INFINITY;
        let mut factor_max = f64::NEG_INFINITY;
        let mut negative = Vec::new();
        let mut extreme = Vec::new();

        for (i, (&w0, &w1)) in before.iter().zip(after.iter()).enumerate() {
            if w0 <= 0.0 {
                continue;
            }
            let g = w1 / w0;
            factor_min = factor_min.min(g);
            factor_max = factor_max.max(g);
            if g < 0.0 {
                negative.push(i);
            } else if !bounds.contains(g) {
                extreme.push(i);
            }
        }
        if factor_min > factor_max {
            factor_min = 1.0;
            factor_max = 1.0;
        }

        let mut warnings = Vec::new();
        if !negative.is_empty() {
            warn!(?method, n_units = negative.len(), "negative calibration factors");
            warnings.push(CalibrationWarning::NegativeFactors { units: negative });
        }
        if !extreme.is_empty() {
            warn!(
                ?method,
                n_units = extreme.len(),
                lower = bounds.lower,
                upper = bounds.upper,
                "calibration factors outside bounds"
            );
            warnings.push(CalibrationWarning::ExtremeFactors { units: extreme, bounds });
        }
        if !converged {
            warn!(?method, iterations, discrepancy = max_discrepancy, "calibration did not converge");
            warnings.push(CalibrationWarning::NotConverged { iterations, discrepancy: max_discrepancy });
        }

        ConvergenceReport {
            method,
            converged,
            iterations,
            max_discrepancy,
            factor_min,
            factor_max,
            warnings,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
