// src/weighting/raking.rs

use ndarray::{Array1, ArrayView1};
use tracing::{debug, instrument};

use super::utils::{sum_by_group_1d, ClassMap};
use crate::error::{check_len, Result, SurveyError};

/// One raking dimension: the category of every unit and the target total
/// of every category.
#[derive(Debug, Clone, PartialEq)]
pub struct Margin {
    pub name: String,
    pub classes: ClassMap,
    pub targets: Array1<f64>,
}

impl Margin {
    pub fn new(name: impl Into<String>, classes: ClassMap, targets: Array1<f64>) -> Result<Self> {
        check_len(classes.n_classes(), targets.len())?;
        Ok(Margin { name: name.into(), classes, targets })
    }

    fn totals(&self, w: ArrayView1<f64>) -> Array1<f64> {
        sum_by_group_1d(w, self.classes.indices(), self.classes.n_classes())
    }
}

/// Result of iterative proportional fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct RakingOutcome {
    pub weights: Array1<f64>,
    pub converged: bool,
    pub iterations: usize,
    pub max_discrepancy: f64,
}

/// Running state of one raking call. Lives on the caller's stack so that
/// concurrent rakes never share iteration state.
struct RakingState {
    current: Array1<f64>,
    best: Array1<f64>,
    best_discrepancy: f64,
    iterations: usize,
}

impl RakingState {
    fn record(&mut self, discrepancy: f64) {
        if discrepancy < self.best_discrepancy {
            self.best_discrepancy = discrepancy;
            self.best.assign(&self.current);
        }
    }
}

/// Largest `|current - target| / target` over every category of every margin.
/// Categories with a zero target contribute their absolute total.
pub fn max_discrepancy(w: ArrayView1<f64>, margins: &[Margin]) -> f64 {
    margins
        .iter()
        .flat_map(|m| {
            let totals = m.totals(w);
            m.targets
                .iter()
                .zip(totals.iter())
                .map(|(&t, &c)| if t.abs() > 0.0 { (c - t).abs() / t.abs() } else { c.abs() })
                .collect::<Vec<_>>()
        })
        .fold(0.0, f64::max)
}

/// Core raking algorithm (iterative proportional fitting).
///
/// Each iteration rescales the weights to every margin in turn. Stops once
/// the relative discrepancy drops below `tolerance`; after `max_iterations`
/// the best iterate seen is returned with `converged == false`.
#[instrument(skip_all, fields(n_margins = margins.len(), tolerance = tolerance, max_iterations = max_iterations))]
pub fn rake(
    weights: ArrayView1<f64>,
    margins: &[Margin],
    tolerance: f64,
    max_iterations: usize,
) -> Result<RakingOutcome> {
    if margins.is_empty() {
        return Err(SurveyError::InvalidInput("no margins provided".into()));
    }
    for margin in margins {
        check_len(weights.len(), margin.classes.len())?;
    }

    let initial = max_discrepancy(weights, margins);
    let mut state = RakingState {
        current: weights.to_owned(),
        best: weights.to_owned(),
        best_discrepancy: initial,
        iterations: 0,
    };
    let mut discrepancy = initial;

    while discrepancy >= tolerance && state.iterations < max_iterations {
        for margin in margins {
            let sums = margin.totals(state.current.view());
            let mut factors = Array1::ones(margin.targets.len());
            for g in 0..margin.targets.len() {
                let target = margin.targets[g];
                if sums[g] > 0.0 {
                    factors[g] = target / sums[g];
                } else if target > 0.0 {
                    return Err(SurveyError::degenerate(
                        format!("{}={}", margin.name, margin.classes.label(g)),
                        format!("zero weight but raking target {}", target),
                    ));
                }
            }
            for (w, &g) in state.current.iter_mut().zip(margin.classes.indices()) {
                *w *= factors[g];
            }
        }

        state.iterations += 1;
        discrepancy = max_discrepancy(state.current.view(), margins);
        state.record(discrepancy);
        debug!(iteration = state.iterations, discrepancy, "raking step");
    }

    let converged = discrepancy < tolerance;
    let (weights, max_discrepancy) = if converged {
        (state.current, discrepancy)
    } else {
        (state.best, state.best_discrepancy)
    };

    Ok(RakingOutcome { weights, converged, iterations: state.iterations, max_discrepancy })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_simple_raking() {
        let w = array![1.0, 1.0, 1.0, 1.0];
        let margin = Margin::new("g", ClassMap::from_codes(&[0, 0, 1, 1]), array![6.0, 2.0]).unwrap();
        let out = rake(w.view(), &[margin], 1e-6, 100).unwrap();

        assert!(out.converged);
        assert_relative_eq!(out.weights[0] + out.weights[1], 6.0, epsilon = 1e-9);
        assert_relative_eq!(out.weights[2] + out.weights[3], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_two_margin_raking() {
        // 2x2 table, consistent margins (both sum to 30)
        let w = array![1.0, 2.0, 3.0, 4.0];
        let rows = Margin::new("row", ClassMap::from_codes(&[0, 0, 1, 1]), array![10.0, 20.0]).unwrap();
        let cols = Margin::new("col", ClassMap::from_codes(&[0, 1, 0, 1]), array![12.0, 18.0]).unwrap();
        let out = rake(w.view(), &[rows.clone(), cols.clone()], 1e-8, 200).unwrap();

        assert!(out.converged);
        assert!(out.max_discrepancy < 1e-8);
        assert_relative_eq!(out.weights.sum(), 30.0, epsilon = 1e-6);
        assert!(max_discrepancy(out.weights.view(), &[rows, cols]) < 1e-8);
    }

    #[test]
    fn test_inconsistent_margins_report_non_convergence() {
        let w = array![1.0, 1.0, 1.0, 1.0];
        let rows = Margin::new("row", ClassMap::from_codes(&[0, 0, 1, 1]), array![10.0, 20.0]).unwrap();
        let cols = Margin::new("col", ClassMap::from_codes(&[0, 1, 0, 1]), array![20.0, 20.0]).unwrap();
        let out = rake(w.view(), &[rows, cols], 1e-6, 25).unwrap();

        assert!(!out.converged);
        assert_eq!(out.iterations, 25);
        assert!(out.max_discrepancy > 1e-6);
        assert!(out.weights.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_zero_weight_category_with_target() {
        let w = array![1.0, 0.0];
        let margin = Margin::new("sex", ClassMap::from_labels(&["f", "m"]), array![5.0, 5.0]).unwrap();
        let err = rake(w.view(), &[margin], 1e-6, 10).unwrap_err();
        assert!(matches!(err, SurveyError::DegenerateCell { ref cell, .. } if cell == "sex=m"));
    }

    #[test]
    fn test_already_calibrated_takes_no_iterations() {
        let w = array![3.0, 7.0];
        let margin = Margin::new("g", ClassMap::from_codes(&[0, 1]), array![3.0, 7.0]).unwrap();
        let out = rake(w.view(), &[margin], 1e-6, 10).unwrap();
        assert!(out.converged);
        assert_eq!(out.iterations, 0);
    }
}
