// src/estimation/estimator.rs

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::domain::{restrict, DomainMask};
use crate::design::Sample;
use crate::error::{check_len, Result, SurveyError};
use crate::weighting::utils::{solve_linear_system, weighted_crossprod, weighted_totals};

// ============================================================================
// Quantile interpolation
// ============================================================================

/// How a weighted quantile is read off the step CDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantileMethod {
    /// Value just below the jump.
    Lower,
    /// Value at the jump.
    #[default]
    Higher,
    Middle,
    Nearest,
    /// Linear interpolation between the bracketing values.
    Linear,
}

impl FromStr for QuantileMethod {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lower" => Ok(QuantileMethod::Lower),
            "higher" => Ok(QuantileMethod::Higher),
            "middle" => Ok(QuantileMethod::Middle),
            "nearest" => Ok(QuantileMethod::Nearest),
            "linear" => Ok(QuantileMethod::Linear),
            other => Err(SurveyError::InvalidInput(format!("unknown quantile method '{}'", other))),
        }
    }
}

/// Quantile `p` of sorted values with cumulative weight shares `cdf`.
pub fn weighted_quantile(y_sorted: &[f64], cdf: &[f64], p: f64, method: QuantileMethod) -> f64 {
    let n = y_sorted.len();
    if n == 0 || !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if n == 1 {
        return y_sorted[0];
    }

    // first value whose cumulative share reaches p
    let right = cdf.partition_point(|&c| c < p).min(n - 1);
    if right == 0 {
        return y_sorted[0];
    }
    let left = right - 1;

    match method {
        QuantileMethod::Lower => y_sorted[left],
        QuantileMethod::Higher => y_sorted[right],
        QuantileMethod::Middle => (y_sorted[left] + y_sorted[right]) / 2.0,
        QuantileMethod::Nearest => {
            if (p - cdf[left]).abs() <= (cdf[right] - p).abs() {
                y_sorted[left]
            } else {
                y_sorted[right]
            }
        }
        QuantileMethod::Linear => {
            let denom = cdf[right] - cdf[left];
            if denom <= 0.0 {
                return y_sorted[left];
            }
            let t = ((p - cdf[left]) / denom).clamp(0.0, 1.0);
            (1.0 - t) * y_sorted[left] + t * y_sorted[right]
        }
    }
}

// ============================================================================
// Custom estimators
// ============================================================================

pub type CustomFn = Arc<dyn Fn(&Sample, ArrayView1<f64>) -> Result<Array1<f64>> + Send + Sync>;

/// Any function of the weights. Only replication can estimate its variance.
#[derive(Clone)]
pub struct CustomEstimator {
    pub name: String,
    pub components: Vec<String>,
    f: CustomFn,
}

impl CustomEstimator {
    pub fn new<F>(name: impl Into<String>, components: Vec<String>, f: F) -> Self
    where
        F: Fn(&Sample, ArrayView1<f64>) -> Result<Array1<f64>> + Send + Sync + 'static,
    {
        CustomEstimator { name: name.into(), components, f: Arc::new(f) }
    }
}

impl fmt::Debug for CustomEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomEstimator")
            .field("name", &self.name)
            .field("components", &self.components)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// A population quantity. Variables are referenced by their resolved
/// outcome position in the [`Sample`].
#[derive(Debug, Clone)]
pub enum Parameter {
    Total(usize),
    Mean(usize),
    Ratio { numerator: usize, denominator: usize },
    Regression { response: usize, predictors: Vec<usize>, intercept: bool },
    Quantile { y: usize, p: f64, method: QuantileMethod },
    Custom(CustomEstimator),
}

impl Parameter {
    pub fn total(sample: &Sample, y: &str) -> Result<Self> {
        Ok(Parameter::Total(sample.outcome_index(y)?))
    }

    pub fn mean(sample: &Sample, y: &str) -> Result<Self> {
        Ok(Parameter::Mean(sample.outcome_index(y)?))
    }

    pub fn ratio(sample: &Sample, numerator: &str, denominator: &str) -> Result<Self> {
        Ok(Parameter::Ratio {
            numerator: sample.outcome_index(numerator)?,
            denominator: sample.outcome_index(denominator)?,
        })
    }

    pub fn regression(sample: &Sample, response: &str, predictors: &[&str], intercept: bool) -> Result<Self> {
        let predictors = predictors.iter().map(|p| sample.outcome_index(p)).collect::<Result<Vec<_>>>()?;
        if predictors.is_empty() && !intercept {
            return Err(SurveyError::InvalidInput("regression needs at least one coefficient".into()));
        }
        Ok(Parameter::Regression { response: sample.outcome_index(response)?, predictors, intercept })
    }

    pub fn quantile(sample: &Sample, y: &str, p: f64, method: QuantileMethod) -> Result<Self> {
        if !(0.0..=1.0).contains(&p) {
            return Err(SurveyError::InvalidInput(format!("quantile must be in [0, 1], got {}", p)));
        }
        Ok(Parameter::Quantile { y: sample.outcome_index(y)?, p, method })
    }

    pub fn median(sample: &Sample, y: &str) -> Result<Self> {
        Self::quantile(sample, y, 0.5, QuantileMethod::default())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Parameter::Total(_) => "total",
            Parameter::Mean(_) => "mean",
            Parameter::Ratio { .. } => "ratio",
            Parameter::Regression { .. } => "regression",
            Parameter::Quantile { .. } => "quantile",
            Parameter::Custom(_) => "custom",
        }
    }

    /// One label per estimated component, e.g. `mean(income)` or
    /// `coef(age)` for regression.
    pub fn component_labels(&self, sample: &Sample) -> Vec<String> {
        let name = |i: usize| sample.outcome_names()[i].as_str();
        match self {
            Parameter::Total(y) => vec![format!("total({})", name(*y))],
            Parameter::Mean(y) => vec![format!("mean({})", name(*y))],
            Parameter::Ratio { numerator, denominator } => {
                vec![format!("ratio({}/{})", name(*numerator), name(*denominator))]
            }
            Parameter::Regression { predictors, intercept, .. } => {
                let mut labels = Vec::with_capacity(predictors.len() + 1);
                if *intercept {
                    labels.push("coef(intercept)".to_string());
                }
                labels.extend(predictors.iter().map(|&p| format!("coef({})", name(p))));
                labels
            }
            Parameter::Quantile { y, p, .. } => vec![format!("quantile({}, {})", name(*y), p)],
            Parameter::Custom(c) => c.components.clone(),
        }
    }

    pub fn n_components(&self) -> usize {
        match self {
            Parameter::Regression { predictors, intercept, .. } => predictors.len() + usize::from(*intercept),
            Parameter::Custom(c) => c.components.len(),
            _ => 1,
        }
    }

    /// Whether a closed-form linearization exists.
    pub fn supports_linearization(&self) -> bool {
        !matches!(self, Parameter::Quantile { .. } | Parameter::Custom(_))
    }

    /// Point estimate, restricted to `domain` when given.
    pub fn point(&self, sample: &Sample, weights: ArrayView1<f64>, domain: Option<&DomainMask>) -> Result<Array1<f64>> {
        check_len(sample.len(), weights.len())?;
        let w = restrict(weights, domain)?;
        self.evaluate(sample, w.view(), scope(domain))
    }

    /// Weighted linearization scores `w_k z_k` (units x components), zero
    /// outside the domain, such that `Var(θ̂) ≈ Var(Σ_k w_k z_k)`.
    pub fn scores(&self, sample: &Sample, weights: ArrayView1<f64>, domain: Option<&DomainMask>) -> Result<Array2<f64>> {
        check_len(sample.len(), weights.len())?;
        let w = restrict(weights, domain)?;
        let cell = scope(domain);

        match self {
            Parameter::Total(y) => {
                let u = &sample.outcome(*y) * &w;
                Ok(u.insert_axis(Axis(1)))
            }
            Parameter::Mean(y) => {
                let y = sample.outcome(*y);
                let sum_w = nonzero(w.sum(), cell)?;
                let est = y.dot(&w) / sum_w;
                let u = Array1::from_iter(y.iter().zip(w.iter()).map(|(&yi, &wi)| wi * (yi - est) / sum_w));
                Ok(u.insert_axis(Axis(1)))
            }
            Parameter::Ratio { numerator, denominator } => {
                let y = sample.outcome(*numerator);
                let x = sample.outcome(*denominator);
                let sum_wx = nonzero(x.dot(&w), cell)?;
                let r = y.dot(&w) / sum_wx;
                let u = Array1::from_iter(
                    y.iter().zip(x.iter()).zip(w.iter()).map(|((&yi, &xi), &wi)| wi * (yi - r * xi) / sum_wx),
                );
                Ok(u.insert_axis(Axis(1)))
            }
            Parameter::Regression { response, predictors, intercept } => {
                let x = design_matrix(sample, predictors, *intercept);
                let y = sample.outcome(*response);
                let fit = fit_wls(self, sample, x.view(), y.view(), w.view(), cell)?;
                let residuals = &y - &x.dot(&fit.coefficients);
                let scaled = &x * &(&residuals * &w).insert_axis(Axis(1));
                Ok(scaled.dot(&fit.inverse))
            }
            Parameter::Quantile { .. } | Parameter::Custom(_) => Err(SurveyError::UnsupportedEstimator(format!(
                "no linearization for {} estimators; use replication",
                self.kind()
            ))),
        }
    }

    /// Estimator on weights that are already zero outside the domain.
    pub(crate) fn evaluate(&self, sample: &Sample, w: ArrayView1<f64>, cell: &str) -> Result<Array1<f64>> {
        match self {
            Parameter::Total(y) => Ok(Array1::from_elem(1, sample.outcome(*y).dot(&w))),
            Parameter::Mean(y) => {
                let sum_w = nonzero(w.sum(), cell)?;
                Ok(Array1::from_elem(1, sample.outcome(*y).dot(&w) / sum_w))
            }
            Parameter::Ratio { numerator, denominator } => {
                let sum_wx = nonzero(sample.outcome(*denominator).dot(&w), cell)?;
                Ok(Array1::from_elem(1, sample.outcome(*numerator).dot(&w) / sum_wx))
            }
            Parameter::Regression { response, predictors, intercept } => {
                let x = design_matrix(sample, predictors, *intercept);
                let y = sample.outcome(*response);
                Ok(fit_wls(self, sample, x.view(), y.view(), w, cell)?.coefficients)
            }
            Parameter::Quantile { y, p, method } => {
                let mut pairs: Vec<(f64, f64)> = sample
                    .outcome(*y)
                    .iter()
                    .zip(w.iter())
                    .filter(|&(_, &wi)| wi > 0.0)
                    .map(|(&yi, &wi)| (yi, wi))
                    .collect();
                let total = nonzero(pairs.iter().map(|(_, wi)| wi).sum::<f64>(), cell)?;
                pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

                let y_sorted: Vec<f64> = pairs.iter().map(|(yi, _)| *yi).collect();
                let cdf: Vec<f64> = pairs
                    .iter()
                    .scan(0.0, |acc, (_, wi)| {
                        *acc += wi;
                        Some(*acc / total)
                    })
                    .collect();
                Ok(Array1::from_elem(1, weighted_quantile(&y_sorted, &cdf, *p, *method)))
            }
            Parameter::Custom(c) => {
                let out = (c.f)(sample, w)?;
                check_len(c.components.len(), out.len())?;
                Ok(out)
            }
        }
    }
}

fn scope(domain: Option<&DomainMask>) -> &str {
    domain.map_or("full sample", |d| d.label.as_str())
}

fn nonzero(denominator: f64, cell: &str) -> Result<f64> {
    if denominator == 0.0 || !denominator.is_finite() {
        return Err(SurveyError::degenerate(cell, "zero weighted denominator"));
    }
    Ok(denominator)
}

fn design_matrix(sample: &Sample, predictors: &[usize], intercept: bool) -> Array2<f64> {
    let offset = usize::from(intercept);
    Array2::from_shape_fn((sample.len(), predictors.len() + offset), |(i, j)| {
        if j < offset {
            1.0
        } else {
            sample.units()[i].outcomes[predictors[j - offset]]
        }
    })
}

struct WlsFit {
    coefficients: Array1<f64>,
    /// `(Xᵀ W X)⁻¹`
    inverse: Array2<f64>,
}

/// Weighted least squares `β = (XᵀWX)⁻¹ XᵀWy`.
fn fit_wls(
    parameter: &Parameter,
    sample: &Sample,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    w: ArrayView1<f64>,
    cell: &str,
) -> Result<WlsFit> {
    let k = x.ncols();
    let n_effective = w.iter().filter(|&&wi| wi > 0.0).count();
    if n_effective < k {
        return Err(SurveyError::degenerate(
            cell,
            format!("{} units with positive weight for {} coefficients", n_effective, k),
        ));
    }

    let xtwx = weighted_crossprod(w, x);
    let wy = &y * &w;
    let xtwy = weighted_totals(wy.view(), x);

    let singular = |column: usize, pivot: f64| SurveyError::SingularCalibration {
        column,
        name: parameter.component_labels(sample).get(column).cloned().unwrap_or_default(),
        pivot,
    };

    let coefficients = solve_linear_system(xtwx.view(), xtwy.view()).map_err(|e| singular(e.column, e.pivot))?;

    let mut inverse = Array2::zeros((k, k));
    for j in 0..k {
        let mut e = Array1::zeros(k);
        e[j] = 1.0;
        let col = solve_linear_system(xtwx.view(), e.view()).map_err(|p| singular(p.column, p.pivot))?;
        inverse.column_mut(j).assign(&col);
    }

    Ok(WlsFit { coefficients, inverse })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::SampleUnit;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn sample(rows: &[[f64; 3]]) -> Sample {
        let units = rows
            .iter()
            .enumerate()
            .map(|(i, r)| SampleUnit::new(format!("u{}", i), None, None, 0.5).with_outcomes(r.to_vec()))
            .collect();
        Sample::new(units, vec!["y".into(), "x".into(), "z".into()], vec![], vec![]).unwrap()
    }

    fn basic() -> Sample {
        sample(&[[1.0, 2.0, 0.0], [2.0, 4.0, 1.0], [3.0, 5.0, 0.0], [4.0, 9.0, 1.0]])
    }

    #[test]
    fn test_total_mean_ratio() {
        let s = basic();
        let w = array![1.0, 2.0, 1.0, 2.0];

        let total = Parameter::total(&s, "y").unwrap().point(&s, w.view(), None).unwrap();
        assert_relative_eq!(total[0], 1.0 + 4.0 + 3.0 + 8.0);

        let mean = Parameter::mean(&s, "y").unwrap().point(&s, w.view(), None).unwrap();
        assert_relative_eq!(mean[0], 16.0 / 6.0);

        let ratio = Parameter::ratio(&s, "y", "x").unwrap().point(&s, w.view(), None).unwrap();
        assert_relative_eq!(ratio[0], 16.0 / (2.0 + 8.0 + 5.0 + 18.0));
    }

    #[test]
    fn test_domain_restricts_summation() {
        let s = basic();
        let w = array![1.0, 2.0, 1.0, 2.0];
        let d = DomainMask::new("odd", vec![false, true, false, true]);

        let mean = Parameter::mean(&s, "y").unwrap().point(&s, w.view(), Some(&d)).unwrap();
        assert_relative_eq!(mean[0], (4.0 + 8.0) / 4.0);

        let scores = Parameter::mean(&s, "y").unwrap().scores(&s, w.view(), Some(&d)).unwrap();
        assert_eq!(scores[[0, 0]], 0.0);
        assert_eq!(scores[[2, 0]], 0.0);
        assert_relative_eq!(scores.sum(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_domain_is_degenerate() {
        let s = basic();
        let w = array![1.0, 1.0, 1.0, 1.0];
        let d = DomainMask::new("none", vec![false; 4]);
        let err = Parameter::mean(&s, "y").unwrap().point(&s, w.view(), Some(&d)).unwrap_err();
        assert!(matches!(err, SurveyError::DegenerateCell { ref cell, .. } if cell == "none"));
    }

    #[test]
    fn test_regression_recovers_exact_line() {
        // y = 1 + 2x
        let s = sample(&[[3.0, 1.0, 0.0], [5.0, 2.0, 0.0], [7.0, 3.0, 0.0], [11.0, 5.0, 0.0]]);
        let w = array![1.0, 3.0, 2.0, 0.5];
        let p = Parameter::regression(&s, "y", &["x"], true).unwrap();
        let beta = p.point(&s, w.view(), None).unwrap();
        assert_relative_eq!(beta[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(beta[1], 2.0, epsilon = 1e-10);
        assert_eq!(p.component_labels(&s), vec!["coef(intercept)", "coef(x)"]);

        // perfect fit: every residual and score vanishes
        let u = p.scores(&s, w.view(), None).unwrap();
        assert!(u.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_regression_collinear_is_singular() {
        // z == x / 2 on every row
        let s = sample(&[[1.0, 2.0, 1.0], [2.0, 4.0, 2.0], [3.0, 6.0, 3.0]]);
        let w = array![1.0, 1.0, 1.0];
        let p = Parameter::regression(&s, "y", &["x", "z"], false).unwrap();
        let err = p.point(&s, w.view(), None).unwrap_err();
        assert!(matches!(err, SurveyError::SingularCalibration { column: 1, .. }));
    }

    #[test]
    fn test_mean_scores_match_regression_on_intercept() {
        let s = basic();
        let w = array![1.0, 2.0, 1.0, 2.0];
        let mean = Parameter::mean(&s, "y").unwrap().scores(&s, w.view(), None).unwrap();
        let reg = Parameter::regression(&s, "y", &[], true).unwrap().scores(&s, w.view(), None).unwrap();
        for i in 0..4 {
            assert_relative_eq!(mean[[i, 0]], reg[[i, 0]], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_weighted_quantile_methods() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let cdf = [0.25, 0.5, 0.75, 1.0];
        assert_eq!(weighted_quantile(&y, &cdf, 0.6, QuantileMethod::Lower), 2.0);
        assert_eq!(weighted_quantile(&y, &cdf, 0.6, QuantileMethod::Higher), 3.0);
        assert_eq!(weighted_quantile(&y, &cdf, 0.6, QuantileMethod::Middle), 2.5);
        assert_eq!(weighted_quantile(&y, &cdf, 0.7, QuantileMethod::Nearest), 3.0);
        assert_relative_eq!(weighted_quantile(&y, &cdf, 0.6, QuantileMethod::Linear), 2.4, epsilon = 1e-12);
        assert!(weighted_quantile(&y, &cdf, 1.5, QuantileMethod::Higher).is_nan());
    }

    #[test]
    fn test_weighted_quantile_below_first_jump() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let cdf = [0.25, 0.5, 0.75, 1.0];
        for method in [
            QuantileMethod::Lower,
            QuantileMethod::Higher,
            QuantileMethod::Middle,
            QuantileMethod::Nearest,
            QuantileMethod::Linear,
        ] {
            for p in [0.0, 0.1, 0.25] {
                assert_eq!(weighted_quantile(&y, &cdf, p, method), 1.0, "{:?} at {}", method, p);
            }
        }
        // ties resolve the same way at every jump
        assert_eq!(weighted_quantile(&y, &cdf, 0.5, QuantileMethod::Higher), 2.0);
        assert_eq!(weighted_quantile(&y, &cdf, 1.0, QuantileMethod::Higher), 4.0);
        assert_eq!(weighted_quantile(&y, &cdf, 0.3, QuantileMethod::Lower), 1.0);
    }

    #[test]
    fn test_weighted_median_ignores_zero_weights() {
        let s = basic();
        let w = array![0.0, 1.0, 1.0, 2.0];
        // cdf over (2, 3, 4) is (0.25, 0.5, 1.0); the jump at 0.5 resolves upward
        let med = Parameter::median(&s, "y").unwrap().point(&s, w.view(), None).unwrap();
        assert_eq!(med[0], 3.0);
    }

    #[test]
    fn test_quantile_and_custom_have_no_scores() {
        let s = basic();
        let w = array![1.0, 1.0, 1.0, 1.0];
        let err = Parameter::median(&s, "y").unwrap().scores(&s, w.view(), None).unwrap_err();
        assert!(matches!(err, SurveyError::UnsupportedEstimator(_)));

        let custom = Parameter::Custom(CustomEstimator::new("wsum", vec!["wsum".into()], |_, w| {
            Ok(Array1::from_elem(1, w.sum()))
        }));
        assert!(!custom.supports_linearization());
        assert_eq!(custom.point(&s, w.view(), None).unwrap()[0], 4.0);
        assert!(custom.scores(&s, w.view(), None).is_err());
    }

    #[test]
    fn test_quantile_method_from_str() {
        assert_eq!("LINEAR".parse::<QuantileMethod>().unwrap(), QuantileMethod::Linear);
        assert!("cubic".parse::<QuantileMethod>().is_err());
    }
}
