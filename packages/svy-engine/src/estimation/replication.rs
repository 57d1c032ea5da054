// src/estimation/replication.rs
//! Replication variance: re-run the estimator on every replicate column.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::{instrument, warn};

use super::domain::{restrict, DomainMask};
use super::estimator::Parameter;
use crate::config::VarianceCenter;
use crate::design::Sample;
use crate::error::{check_len, Result, SurveyError};
use crate::weighting::ReplicateWeightTable;

/// Estimate of `parameter` under every replicate column (replicates x
/// components). Each column is evaluated on its own; a replicate in which
/// the estimator is undefined (e.g. the domain lost all its weight) yields
/// NaN instead of failing the whole table.
#[instrument(skip_all, fields(parameter = parameter.kind(), n_replicates = table.n_replicates()))]
pub fn replicate_estimates(
    parameter: &Parameter,
    sample: &Sample,
    table: &ReplicateWeightTable,
    domain: Option<&DomainMask>,
) -> Result<Array2<f64>> {
    check_len(sample.len(), table.n_units())?;
    let k = parameter.n_components();
    let cell = domain.map_or("full sample", |d| d.label.as_str());

    let rows: Vec<Array1<f64>> = (0..table.n_replicates())
        .into_par_iter()
        .map(|r| {
            let w = restrict(table.column(r), domain)?;
            match parameter.evaluate(sample, w.view(), cell) {
                Ok(theta) => Ok(theta),
                Err(SurveyError::DegenerateCell { reason, .. }) => {
                    warn!(replicate = r, cell = cell, reason = %reason, "estimator undefined in replicate");
                    Ok(Array1::from_elem(k, f64::NAN))
                }
                Err(e) => Err(e),
            }
        })
        .collect::<Result<_>>()?;

    let mut out = Array2::zeros((rows.len(), k));
    for (r, row) in rows.iter().enumerate() {
        check_len(k, row.len())?;
        out.row_mut(r).assign(row);
    }
    Ok(out)
}

/// `Σ_r c_r (θ_r - θ_c)(θ_r - θ_c)ᵀ` where `θ_c` is the full-sample
/// estimate or the mean of the replicate estimates.
pub fn replication_covariance(
    full: ArrayView1<f64>,
    replicates: ArrayView2<f64>,
    coefficients: &[f64],
    center: VarianceCenter,
) -> Result<Array2<f64>> {
    check_len(replicates.nrows(), coefficients.len())?;
    check_len(full.len(), replicates.ncols())?;
    let k = full.len();

    let center_value = match center {
        VarianceCenter::FullSample => full.to_owned(),
        VarianceCenter::ReplicateMean => replicates
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::from_elem(k, f64::NAN)),
    };

    let mut cov = Array2::zeros((k, k));
    for (theta, &c) in replicates.outer_iter().zip(coefficients) {
        let d = &theta - &center_value;
        for i in 0..k {
            for j in 0..k {
                cov[[i, j]] += c * d[i] * d[j];
            }
        }
    }
    Ok(cov)
}
