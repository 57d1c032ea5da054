// src/weighting/calibration.rs

use ndarray::{Array1, ArrayView1, ArrayView2};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use super::diagnostics::{CalibrationKind, ConvergenceReport};
use super::raking::{rake, Margin};
use super::replication::ReplicateWeightTable;
use super::utils::{solve_linear_system, weighted_crossprod, weighted_totals, ClassMap};
use super::weight::{AdjustmentStep, Weight};
use crate::config::{CalibrationMethod, FactorBounds};
use crate::design::Sample;
use crate::error::{check_len, Result, SurveyError};

/// Known population information to calibrate to.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationTarget {
    /// Auxiliary variable name -> population total (GREG).
    Totals(BTreeMap<String, f64>),
    /// Categorical variable name -> category -> population total (raking).
    Margins(BTreeMap<String, BTreeMap<String, f64>>),
}

fn relative_gap(current: f64, target: f64) -> f64 {
    if target.abs() > 0.0 {
        (current - target).abs() / target.abs()
    } else {
        current.abs()
    }
}

/// Linear (GREG) calibration of one weight vector.
///
/// Solves `S λ = T - t` with `S = Σ w_k x_k x_kᵀ` and `t = Σ w_k x_k`, then
/// returns `w_k · (1 + x_kᵀ λ)`. `names` label the columns of `x` in errors.
pub fn calibrate_linear(
    weights: ArrayView1<f64>,
    x: ArrayView2<f64>,
    totals: ArrayView1<f64>,
    names: &[String],
) -> Result<Array1<f64>> {
    check_len(weights.len(), x.nrows())?;
    check_len(x.ncols(), totals.len())?;

    let current = weighted_totals(weights, x);
    let s = weighted_crossprod(weights, x);
    let rhs = &totals - &current;

    let lambda = solve_linear_system(s.view(), rhs.view()).map_err(|p| SurveyError::SingularCalibration {
        column: p.column,
        name: names.get(p.column).cloned().unwrap_or_else(|| format!("#{}", p.column)),
        pivot: p.pivot,
    })?;

    let g = x.dot(&lambda) + 1.0;
    Ok(&weights * &g)
}

/// GREG solved independently within each cell, each cell with its own totals.
/// Cells are processed in parallel.
pub fn calibrate_by_cells(
    weights: ArrayView1<f64>,
    x: ArrayView2<f64>,
    cells: &ClassMap,
    totals: &[Array1<f64>],
    names: &[String],
) -> Result<Array1<f64>> {
    check_len(weights.len(), cells.len())?;
    check_len(cells.n_classes(), totals.len())?;

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); cells.n_classes()];
    for (i, &c) in cells.indices().iter().enumerate() {
        members[c].push(i);
    }

    let solved: Vec<(usize, Array1<f64>)> = members
        .par_iter()
        .enumerate()
        .map(|(c, rows)| {
            let w = weights.select(ndarray::Axis(0), rows);
            let xc = x.select(ndarray::Axis(0), rows);
            calibrate_linear(w.view(), xc.view(), totals[c].view(), names)
                .map_err(|e| match e {
                    SurveyError::SingularCalibration { column, name, pivot } => SurveyError::SingularCalibration {
                        column,
                        name: format!("{} in cell {}", name, cells.label(c)),
                        pivot,
                    },
                    other => other,
                })
                .map(|cal| (c, cal))
        })
        .collect::<Result<_>>()?;

    let mut calibrated = weights.to_owned();
    for (c, values) in solved {
        for (&i, &v) in members[c].iter().zip(values.iter()) {
            calibrated[i] = v;
        }
    }
    Ok(calibrated)
}

/// Re-run GREG on every replicate column so replicate weights carry the
/// same calibration as the full-sample weight.
pub fn calibrate_replicates(
    table: &ReplicateWeightTable,
    x: ArrayView2<f64>,
    totals: ArrayView1<f64>,
    names: &[String],
) -> Result<ReplicateWeightTable> {
    table.map_columns(|col| calibrate_linear(col, x, totals, names))
}

fn resolve_totals(sample: &Sample, totals: &BTreeMap<String, f64>) -> Result<(Vec<String>, Vec<usize>, Array1<f64>)> {
    let mut names = Vec::with_capacity(totals.len());
    let mut columns = Vec::with_capacity(totals.len());
    for name in totals.keys() {
        columns.push(sample.auxiliary_index(name)?);
        names.push(name.clone());
    }
    let values = Array1::from_iter(totals.values().copied());
    Ok((names, columns, values))
}

fn resolve_margins(sample: &Sample, margins: &BTreeMap<String, BTreeMap<String, f64>>) -> Result<Vec<Margin>> {
    margins
        .iter()
        .map(|(name, categories)| {
            let idx = sample.category_index(name)?;
            let classes = ClassMap::from_labels(&sample.category(idx));
            let mut targets = Array1::zeros(classes.n_classes());
            for (c, label) in classes.labels().iter().enumerate() {
                targets[c] = *categories.get(label).ok_or_else(|| {
                    SurveyError::InvalidInput(format!("category '{}' of margin '{}' has no target", label, name))
                })?;
            }
            if let Some((label, total)) = categories
                .iter()
                .find(|(label, total)| **total > 0.0 && !classes.labels().contains(*label))
            {
                return Err(SurveyError::degenerate(
                    format!("{}={}", name, label),
                    format!("no sampled unit but raking target {}", total),
                ));
            }
            Margin::new(name.clone(), classes, targets)
        })
        .collect()
}

/// Calibrate a weight to known population information.
///
/// GREG requires [`CalibrationTarget::Totals`], raking requires
/// [`CalibrationTarget::Margins`]. Factors outside `bounds` and raking
/// non-convergence are reported, never raised.
#[instrument(skip_all, fields(n_units = weight.len()))]
pub fn calibrate(
    weight: &Weight,
    sample: &Sample,
    target: &CalibrationTarget,
    method: &CalibrationMethod,
    bounds: FactorBounds,
) -> Result<(Weight, ConvergenceReport)> {
    check_len(sample.len(), weight.len())?;

    match (method, target) {
        (CalibrationMethod::Greg, CalibrationTarget::Totals(totals)) => {
            let (names, columns, values) = resolve_totals(sample, totals)?;
            let x = sample.auxiliary_matrix(&columns);
            let calibrated = calibrate_linear(weight.values(), x.view(), values.view(), &names)?;

            let achieved = weighted_totals(calibrated.view(), x.view());
            let gap = achieved
                .iter()
                .zip(values.iter())
                .map(|(&c, &t)| relative_gap(c, t))
                .fold(0.0, f64::max);
            debug!(gap, "GREG solved");

            let report = ConvergenceReport::assess(
                CalibrationKind::Greg,
                true,
                1,
                gap,
                weight.values(),
                calibrated.view(),
                bounds,
            );
            Ok((weight.adjust_to(AdjustmentStep::Greg, calibrated)?, report))
        }
        (CalibrationMethod::Raking { tolerance, max_iterations }, CalibrationTarget::Margins(margins)) => {
            let margins = resolve_margins(sample, margins)?;
            let outcome = rake(weight.values(), &margins, *tolerance, *max_iterations)?;
            let report = ConvergenceReport::assess(
                CalibrationKind::Raking,
                outcome.converged,
                outcome.iterations,
                outcome.max_discrepancy,
                weight.values(),
                outcome.weights.view(),
                bounds,
            );
            Ok((weight.adjust_to(AdjustmentStep::Raking, outcome.weights)?, report))
        }
        (CalibrationMethod::Greg, CalibrationTarget::Margins(_)) => Err(SurveyError::InvalidInput(
            "GREG calibration needs auxiliary totals, got categorical margins".into(),
        )),
        (CalibrationMethod::Raking { .. }, CalibrationTarget::Totals(_)) => Err(SurveyError::InvalidInput(
            "raking needs categorical margins, got auxiliary totals".into(),
        )),
    }
}
