// src/estimation/taylor.rs
//
// Taylor linearization: the variance of a smooth estimator is approximated
// by the design variance of the weighted total of its scores, computed
// with the stratified ultimate-cluster formula.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use tracing::{debug, instrument};

use super::domain::{restrict, DomainMask};
use super::estimator::Parameter;
use crate::config::SingletonMethod;
use crate::design::{Design, Sample};
use crate::error::{check_len, Result};
use crate::weighting::utils::sum_by_group_2d;

// ============================================================================
// Design variance of score totals
// ============================================================================

/// Covariance of `Σ_k u_k` for each column of `scores` (units x components):
///
/// `Σ_h fpc_h · n_h/(n_h - 1) · Σ_c (t_hc - t̄_h)(t_hc - t̄_h)ᵀ`
///
/// where `t_hc` are cluster totals of the scores. Strata with one cluster
/// contribute nothing under [`SingletonMethod::Skip`]; under
/// [`SingletonMethod::Center`] their cluster total is centred on the mean of
/// all cluster totals instead.
#[instrument(skip_all, fields(n_units = scores.nrows(), n_components = scores.ncols()))]
pub fn taylor_covariance(design: &Design, scores: ArrayView2<f64>, singleton: SingletonMethod) -> Result<Array2<f64>> {
    check_len(design.n_units(), scores.nrows())?;
    let k = scores.ncols();
    let n_clusters = design.clusters().len();

    let totals = sum_by_group_2d(scores, design.cluster_indices(), n_clusters);
    let grand_mean = match singleton {
        SingletonMethod::Center if n_clusters > 0 => totals.sum_axis(Axis(0)) / n_clusters as f64,
        _ => Array1::zeros(k),
    };

    let mut cov = Array2::zeros((k, k));
    let mut skipped = 0usize;

    for stratum in design.strata() {
        let n_h = stratum.n_clusters();
        if n_h == 0 || stratum.fpc == 0.0 {
            continue;
        }

        if n_h == 1 {
            match singleton {
                SingletonMethod::Skip => skipped += 1,
                SingletonMethod::Center => {
                    let d = &totals.row(stratum.clusters[0]) - &grand_mean;
                    add_outer(&mut cov, d.view(), stratum.fpc);
                }
            }
            continue;
        }

        let mut mean_h: Array1<f64> = Array1::zeros(k);
        for &c in &stratum.clusters {
            mean_h += &totals.row(c);
        }
        mean_h /= n_h as f64;

        let factor = stratum.fpc * n_h as f64 / (n_h as f64 - 1.0);
        for &c in &stratum.clusters {
            let d = &totals.row(c) - &mean_h;
            add_outer(&mut cov, d.view(), factor);
        }
    }

    if skipped > 0 {
        debug!(singleton_strata = skipped, "single-cluster strata contribute no variance");
    }

    Ok(cov)
}

/// Variance of the score total of a single component.
pub fn taylor_variance(design: &Design, scores: ArrayView1<f64>, singleton: SingletonMethod) -> Result<f64> {
    let cov = taylor_covariance(design, scores.insert_axis(Axis(1)), singleton)?;
    Ok(cov[[0, 0]])
}

fn add_outer(cov: &mut Array2<f64>, d: ArrayView1<f64>, factor: f64) {
    let k = d.len();
    for i in 0..k {
        for j in 0..k {
            cov[[i, j]] += factor * d[i] * d[j];
        }
    }
}

// ============================================================================
// SRS variance (design effect denominator)
// ============================================================================

/// `n/(n-1) Σ w̃ (y - ȳ)²` with normalized weights `w̃`.
fn weighted_s2(y: &[f64], wn: &[f64]) -> f64 {
    let n = y.len() as f64;
    if n <= 1.0 {
        return f64::NAN;
    }
    let mu: f64 = y.iter().zip(wn).map(|(yi, wi)| wi * yi).sum();
    let ss: f64 = y.iter().zip(wn).map(|(yi, wi)| wi * (yi - mu).powi(2)).sum();
    (n / (n - 1.0)) * ss
}

/// Variance the same estimator would have under simple random sampling
/// without replacement of the same number of units. NaN where undefined
/// (quantiles, custom estimators, fewer than two units).
pub fn srs_variance(
    parameter: &Parameter,
    sample: &Sample,
    weights: ArrayView1<f64>,
    domain: Option<&DomainMask>,
) -> Result<Array1<f64>> {
    check_len(sample.len(), weights.len())?;
    let k = parameter.n_components();
    let w = restrict(weights, domain)?;

    let members: Vec<usize> = (0..w.len()).filter(|&i| w[i] > 0.0).collect();
    let n = members.len() as f64;
    let sum_w: f64 = members.iter().map(|&i| w[i]).sum();
    if n < 2.0 || sum_w <= 0.0 {
        return Ok(Array1::from_elem(k, f64::NAN));
    }
    // normalized weights have no population size to correct against
    let fpc = if sum_w > n { 1.0 - n / sum_w } else { 1.0 };
    let wn: Vec<f64> = members.iter().map(|&i| w[i] / sum_w).collect();
    let pick = |var: usize| -> Vec<f64> {
        let y = sample.outcome(var);
        members.iter().map(|&i| y[i]).collect()
    };

    let v = match parameter {
        Parameter::Total(y) => {
            let s2 = weighted_s2(&pick(*y), &wn);
            Array1::from_elem(1, sum_w.powi(2) / n * s2 * fpc)
        }
        Parameter::Mean(y) => {
            let s2 = weighted_s2(&pick(*y), &wn);
            Array1::from_elem(1, s2 / n * fpc)
        }
        Parameter::Ratio { numerator, denominator } => {
            let yv = pick(*numerator);
            let xv = pick(*denominator);
            let ybar: f64 = yv.iter().zip(&wn).map(|(yi, wi)| wi * yi).sum();
            let xbar: f64 = xv.iter().zip(&wn).map(|(xi, wi)| wi * xi).sum();
            if xbar == 0.0 {
                return Ok(Array1::from_elem(1, f64::NAN));
            }
            let r = ybar / xbar;
            let e: Vec<f64> = yv.iter().zip(&xv).map(|(yi, xi)| yi - r * xi).collect();
            Array1::from_elem(1, weighted_s2(&e, &wn) / (n * xbar.powi(2)) * fpc)
        }
        Parameter::Regression { .. } => {
            let scores = parameter.scores(sample, weights, domain)?;
            let mut out = Array1::zeros(k);
            for j in 0..k {
                let u: Vec<f64> = members.iter().map(|&i| scores[[i, j]]).collect();
                let mean = u.iter().sum::<f64>() / n;
                let ss: f64 = u.iter().map(|ui| (ui - mean).powi(2)).sum();
                out[j] = fpc * n / (n - 1.0) * ss;
            }
            out
        }
        Parameter::Quantile { .. } | Parameter::Custom(_) => Array1::from_elem(k, f64::NAN),
    };
    Ok(v)
}
