// src/weighting/design_weights.rs

use ndarray::Array1;
use tracing::{debug, instrument};

use super::weight::Weight;
use crate::design::{Design, Sample};
use crate::error::{check_len, Result};

/// Inverse inclusion probabilities.
///
/// For multi-stage designs each stage probability is conditional on the
/// unit's survival to that stage, so the weight is the product of the
/// per-stage inverses.
#[instrument(skip_all, fields(n_units = sample.len()))]
pub fn build_design_weights(sample: &Sample, design: &Design) -> Result<Weight> {
    check_len(design.n_units(), sample.len())?;

    let base = Array1::from_shape_fn(sample.len(), |i| {
        design.stage_probabilities(i).iter().map(|p| 1.0 / p).product::<f64>()
    });

    debug!(total = base.sum(), "design weights built");
    Weight::from_base(base)
}
