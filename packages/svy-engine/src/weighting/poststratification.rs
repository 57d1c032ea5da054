// src/weighting/poststratification.rs

use tracing::{debug, instrument};

use super::normalization::normalization_factors;
use super::utils::ClassMap;
use super::weight::{AdjustmentStep, Weight};
use crate::error::{Result, SurveyError};

/// Post-stratification: scale each cell to its known population total.
///
/// This is normalization with strict validation, one non-negative control
/// per cell present in the data.
#[instrument(skip_all, fields(n_cells = cells.n_classes()))]
pub fn poststratify(weight: &Weight, cells: &ClassMap, control: &[f64]) -> Result<Weight> {
    if control.len() != cells.n_classes() {
        return Err(SurveyError::InvalidInput(format!(
            "post-stratification requires exact match: {} cells in data but {} controls provided",
            cells.n_classes(),
            control.len()
        )));
    }
    if let Some(c) = control.iter().position(|&v| !(v >= 0.0) || !v.is_finite()) {
        return Err(SurveyError::InvalidInput(format!(
            "control total for cell {} is {}",
            cells.label(c),
            control[c]
        )));
    }

    let factors = normalization_factors(weight.values(), cells, Some(control))?;
    let adjusted = weight.adjust(AdjustmentStep::Poststratification, factors)?;
    debug!(total = adjusted.total(), "post-stratified");
    Ok(adjusted)
}

/// Post-stratification to population shares instead of totals. The overall
/// weight total is kept, redistributed across cells by `shares`.
pub fn poststratify_shares(weight: &Weight, cells: &ClassMap, shares: &[f64]) -> Result<Weight> {
    let sum: f64 = shares.iter().sum();
    if (sum - 1.0).abs() > 1e-6 {
        return Err(SurveyError::InvalidInput(format!("post-stratification shares sum to {}", sum)));
    }
    let total = weight.total();
    let control: Vec<f64> = shares.iter().map(|s| s * total).collect();
    poststratify(weight, cells, &control)
}
