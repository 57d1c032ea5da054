// src/weighting/normalization.rs

use ndarray::{Array1, ArrayView1};
use tracing::instrument;

use super::utils::{sum_by_group_1d, ClassMap};
use super::weight::{AdjustmentStep, Weight};
use crate::error::{check_len, Result, SurveyError};

/// Per-group scaling factors `control_g / Σ_{k∈g} w_k`.
///
/// Without a control, each group is scaled to its number of units. A single
/// control value applies to every group.
pub fn normalization_factors(
    weights: ArrayView1<f64>,
    groups: &ClassMap,
    control: Option<&[f64]>,
) -> Result<Array1<f64>> {
    check_len(weights.len(), groups.len())?;
    let n_groups = groups.n_classes();

    let targets: Vec<f64> = match control {
        None => groups.counts().into_iter().map(|c| c as f64).collect(),
        Some([single]) => vec![*single; n_groups],
        Some(ctrl) => {
            check_len(n_groups, ctrl.len())?;
            ctrl.to_vec()
        }
    };

    let sums = sum_by_group_1d(weights, groups.indices(), n_groups);
    let mut factors = Array1::ones(n_groups);
    for g in 0..n_groups {
        if sums[g] > 0.0 {
            factors[g] = targets[g] / sums[g];
        } else if targets[g] > 0.0 {
            return Err(SurveyError::degenerate(
                groups.label(g),
                format!("zero weight but control total {}", targets[g]),
            ));
        }
    }

    Ok(Array1::from_shape_fn(weights.len(), |i| factors[groups.indices()[i]]))
}

/// Rescale weights so they sum to a control total, globally or by group.
#[instrument(skip_all, fields(grouped = groups.is_some()))]
pub fn normalize(weight: &Weight, groups: Option<&ClassMap>, control: Option<&[f64]>) -> Result<Weight> {
    let single;
    let groups = match groups {
        Some(g) => g,
        None => {
            single = ClassMap::single(weight.len());
            &single
        }
    };
    let factors = normalization_factors(weight.values(), groups, control)?;
    weight.adjust(AdjustmentStep::Normalization, factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_normalize_to_sample_size() {
        let w = Weight::from_base(array![10.0, 20.0, 30.0, 40.0]).unwrap();
        let n = normalize(&w, None, None).unwrap();
        assert_relative_eq!(n.total(), 4.0, epsilon = 1e-12);
        assert_relative_eq!(n.values()[3], 1.6, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_by_group_with_controls() {
        let w = Weight::from_base(array![1.0, 1.0, 2.0, 2.0]).unwrap();
        let groups = ClassMap::from_labels(&["x", "x", "y", "y"]);
        let n = normalize(&w, Some(&groups), Some(&[10.0, 40.0])).unwrap();

        assert_relative_eq!(n.values()[0], 5.0, epsilon = 1e-12);
        assert_relative_eq!(n.values()[2], 20.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_control_applies_to_every_group() {
        let w = Weight::from_base(array![1.0, 3.0, 5.0]).unwrap();
        let groups = ClassMap::from_labels(&["x", "x", "y"]);
        let n = normalize(&w, Some(&groups), Some(&[2.0])).unwrap();
        assert_relative_eq!(n.values()[0] + n.values()[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(n.values()[2], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_control_length_mismatch() {
        let w = Weight::from_base(array![1.0, 1.0]).unwrap();
        let groups = ClassMap::from_labels(&["x", "y"]);
        assert!(matches!(
            normalize(&w, Some(&groups), Some(&[1.0, 2.0, 3.0])),
            Err(SurveyError::DimensionMismatch { .. })
        ));
    }
}
