// tests/test_weighting.rs
//! Weight construction and adjustment across the public API.

use approx::assert_relative_eq;
use ndarray::Array1;
use proptest::prelude::*;
use std::collections::BTreeMap;
use svy_engine::weighting::{
    apply_adjustment, poststratify, trim, CalibrationKind, CalibrationWarning, ClassMap,
};
use svy_engine::{
    build_design_weights, calibrate, CalibrationMethod, CalibrationTarget, Design, DesignSpec, FactorBounds,
    ResponseStatus, Sample, SampleUnit, StageSpec, SurveyError, TrimBounds, Weight,
};

fn cell_totals(values: &[f64], cells: &[i64]) -> BTreeMap<i64, f64> {
    let mut totals = BTreeMap::new();
    for (&v, &c) in values.iter().zip(cells) {
        *totals.entry(c).or_insert(0.0) += v;
    }
    totals
}

// ============================================================================
// Design weights
// ============================================================================

#[test]
fn test_two_stage_weights_are_products_of_inverse_probabilities() {
    let spec = DesignSpec::new(vec![
        StageSpec::new(Some("district"), Some("village")),
        StageSpec::new(None, Some("household")),
    ])
    .unwrap();
    let draws = [("d1", "v1", 0.1, "h1", 0.5), ("d1", "v1", 0.1, "h2", 0.5), ("d1", "v2", 0.2, "h3", 0.25), ("d2", "v3", 0.05, "h4", 1.0)];
    let units = draws
        .iter()
        .enumerate()
        .map(|(i, &(d, v, p1, h, p2))| {
            SampleUnit::new(format!("u{}", i), Some(d), Some(v), p1).with_stage(None, Some(h), p2)
        })
        .collect();
    let sample = Sample::new(units, vec![], vec![], vec![]).unwrap();
    let design = Design::new(&sample, spec).unwrap();
    let w = build_design_weights(&sample, &design).unwrap();

    for (i, &(_, _, p1, _, p2)) in draws.iter().enumerate() {
        assert_relative_eq!(w.values()[i], 1.0 / (p1 * p2), max_relative = 1e-12);
    }
    assert_eq!(design.strata().len(), 2);
    assert_eq!(design.clusters().len(), 3);
}

// ============================================================================
// Nonresponse and post-stratification
// ============================================================================

#[test]
fn test_nonresponse_preserves_cell_totals() {
    use ResponseStatus::*;
    let w = Weight::from_base(Array1::from(vec![10.0, 12.0, 8.0, 5.0, 20.0, 20.0, 15.0, 9.0])).unwrap();
    let cells = [0, 0, 0, 0, 1, 1, 1, 1];
    let response = [Respondent, Nonrespondent, Ineligible, Unknown, Respondent, Respondent, Unknown, Nonrespondent];
    let classes = ClassMap::from_codes(&cells);

    for unknown_to_ineligible in [false, true] {
        let adjusted = apply_adjustment(&w, &classes, &response, unknown_to_ineligible).unwrap();
        let before = cell_totals(w.values().as_slice().unwrap(), &cells);
        let after = cell_totals(adjusted.values().as_slice().unwrap(), &cells);
        for (c, total) in before {
            assert_relative_eq!(after[&c], total, max_relative = 1e-12);
        }
        for (i, status) in response.iter().enumerate() {
            if matches!(status, Nonrespondent | Unknown) {
                assert_eq!(adjusted.values()[i], 0.0);
            }
        }
        if !unknown_to_ineligible {
            // eligible weight of cell 0 (10 + 12 + 5) lands on its respondent
            assert_relative_eq!(adjusted.values()[0], 27.0, max_relative = 1e-12);
            assert_relative_eq!(adjusted.values()[2], 8.0, max_relative = 1e-12);
        }
        // the chain reproduces the final weight
        for (r, v) in adjusted.reconstruct().iter().zip(adjusted.values().iter()) {
            assert_relative_eq!(*r, *v, max_relative = 1e-12);
        }
    }
}

#[test]
fn test_nonresponse_cell_without_respondents_is_degenerate() {
    use ResponseStatus::*;
    let w = Weight::from_base(Array1::from(vec![1.0, 1.0, 1.0])).unwrap();
    let classes = ClassMap::from_labels(&["north", "south", "south"]);
    let err = apply_adjustment(&w, &classes, &[Respondent, Nonrespondent, Nonrespondent], false).unwrap_err();
    match err {
        SurveyError::DegenerateCell { cell, .. } => assert_eq!(cell, "south"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_poststratification_reproduces_controls() {
    let w = Weight::from_base(Array1::from(vec![3.0, 7.0, 2.0, 2.0, 9.0, 1.0])).unwrap();
    let classes = ClassMap::from_labels(&["a", "b", "c", "a", "b", "c"]);
    let controls = [100.0, 250.0, 40.0];
    let adjusted = poststratify(&w, &classes, &controls).unwrap();

    let mut achieved = [0.0; 3];
    for (i, &c) in classes.indices().iter().enumerate() {
        achieved[c] += adjusted.values()[i];
    }
    for (a, c) in achieved.iter().zip(&controls) {
        assert_relative_eq!(*a, *c, max_relative = 1e-12);
    }
    assert!(poststratify(&w, &classes, &controls[..2]).is_err());
}

// ============================================================================
// Calibration
// ============================================================================

fn auxiliary_sample(x: &[f64]) -> Sample {
    let units = x
        .iter()
        .enumerate()
        .map(|(i, &xi)| SampleUnit::new(format!("u{}", i), None, None, 0.5).with_auxiliaries(vec![1.0, xi, xi]))
        .collect();
    Sample::new(units, vec![], vec!["one".into(), "x".into(), "x_copy".into()], vec![]).unwrap()
}

fn greg_targets(one: f64, x: f64) -> CalibrationTarget {
    let mut totals = BTreeMap::new();
    totals.insert("one".to_string(), one);
    totals.insert("x".to_string(), x);
    CalibrationTarget::Totals(totals)
}

#[test]
fn test_greg_flags_extreme_factors() {
    let x = [1.0, 2.0, 3.0, 4.0];
    let sample = auxiliary_sample(&x);
    let w = Weight::from_base(Array1::from_elem(4, 2.0)).unwrap();
    // five times the current totals: every factor is 5
    let (cal, report) = calibrate(&w, &sample, &greg_targets(40.0, 100.0), &CalibrationMethod::Greg, FactorBounds::default())
        .unwrap();

    assert_relative_eq!(cal.total(), 40.0, max_relative = 1e-10);
    assert_eq!(report.method, CalibrationKind::Greg);
    assert!(report.converged);
    assert_relative_eq!(report.factor_max, 5.0, max_relative = 1e-10);
    assert!(!report.is_clean());
    assert!(report.warnings.iter().any(|w| matches!(w, CalibrationWarning::ExtremeFactors { .. })));
}

#[test]
fn test_greg_collinear_auxiliaries_are_singular() {
    let sample = auxiliary_sample(&[1.0, 2.0, 3.0, 4.0]);
    let w = Weight::from_base(Array1::from_elem(4, 2.0)).unwrap();
    let mut totals = BTreeMap::new();
    totals.insert("x".to_string(), 25.0);
    totals.insert("x_copy".to_string(), 25.0);
    let err = calibrate(&w, &sample, &CalibrationTarget::Totals(totals), &CalibrationMethod::Greg, FactorBounds::default())
        .unwrap_err();
    assert!(matches!(err, SurveyError::SingularCalibration { .. }));
}

fn margin_sample() -> Sample {
    let cells = [("m", "young"), ("m", "old"), ("f", "young"), ("f", "old")];
    let units = (0..8)
        .map(|i| {
            let (sex, age) = cells[i % 4];
            SampleUnit::new(format!("u{}", i), None, None, 0.2).with_categories(vec![sex.into(), age.into()])
        })
        .collect();
    Sample::new(units, vec![], vec![], vec!["sex".into(), "age".into()]).unwrap()
}

fn margins(sex: [f64; 2], age: [f64; 2]) -> CalibrationTarget {
    let mut m = BTreeMap::new();
    m.insert("sex".to_string(), BTreeMap::from([("m".to_string(), sex[0]), ("f".to_string(), sex[1])]));
    m.insert("age".to_string(), BTreeMap::from([("young".to_string(), age[0]), ("old".to_string(), age[1])]));
    CalibrationTarget::Margins(m)
}

#[test]
fn test_raking_converges_on_consistent_margins() {
    let sample = margin_sample();
    let w = Weight::from_base(Array1::from_elem(8, 5.0)).unwrap();
    let (raked, report) =
        calibrate(&w, &sample, &margins([30.0, 20.0], [15.0, 35.0]), &CalibrationMethod::raking(), FactorBounds::default())
            .unwrap();

    assert!(report.converged);
    assert_eq!(report.method, CalibrationKind::Raking);
    assert!(report.max_discrepancy < 1e-6);

    let sex = sample.category(sample.category_index("sex").unwrap());
    let male: f64 = raked.values().iter().zip(&sex).filter(|(_, s)| **s == "m").map(|(w, _)| w).sum();
    assert_relative_eq!(male, 30.0, max_relative = 1e-6);
    assert_relative_eq!(raked.total(), 50.0, max_relative = 1e-6);
}

#[test]
fn test_raking_reports_inconsistent_margins() {
    let sample = margin_sample();
    let w = Weight::from_base(Array1::from_elem(8, 5.0)).unwrap();
    let method = CalibrationMethod::Raking { tolerance: 1e-8, max_iterations: 25 };
    let (_, report) =
        calibrate(&w, &sample, &margins([30.0, 20.0], [30.0, 30.0]), &method, FactorBounds::default()).unwrap();

    assert!(!report.converged);
    assert!(report.max_discrepancy > 1e-8);
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, CalibrationWarning::NotConverged { iterations: 25, .. })));
}

#[test]
fn test_raking_requires_target_for_every_category() {
    let sample = margin_sample();
    let w = Weight::from_base(Array1::from_elem(8, 5.0)).unwrap();
    let mut m = BTreeMap::new();
    m.insert("sex".to_string(), BTreeMap::from([("m".to_string(), 30.0)]));
    let result = calibrate(&w, &sample, &CalibrationTarget::Margins(m), &CalibrationMethod::raking(), FactorBounds::default());
    assert!(result.is_err());
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Property: GREG weights reproduce the targets they were calibrated to
    #[test]
    fn prop_greg_reproduces_targets(
        weights in prop::collection::vec(1.0f64..10.0, 6..30),
        jitter in prop::collection::vec(0.0f64..1.0, 30),
        scale_one in 0.8f64..1.25,
        scale_x in 0.8f64..1.25,
    ) {
        let x: Vec<f64> = (0..weights.len()).map(|i| i as f64 + jitter[i]).collect();
        let sample = auxiliary_sample(&x);
        let w = Weight::from_base(Array1::from(weights.clone())).unwrap();

        let current_x: f64 = weights.iter().zip(&x).map(|(w, x)| w * x).sum();
        let target_one = w.total() * scale_one;
        let target_x = current_x * scale_x;
        let (cal, _) = calibrate(&w, &sample, &greg_targets(target_one, target_x), &CalibrationMethod::Greg, FactorBounds::default())
            .unwrap();

        let achieved_x: f64 = cal.values().iter().zip(&x).map(|(w, x)| w * x).sum();
        prop_assert!((cal.total() - target_one).abs() <= 1e-8 * target_one);
        prop_assert!((achieved_x - target_x).abs() <= 1e-8 * target_x);
    }

    // Property: trimming never changes a cell total and keeps weights in bounds
    #[test]
    fn prop_trimming_preserves_cell_totals(
        weights in prop::collection::vec(0.1f64..100.0, 4..40),
        codes in prop::collection::vec(0i64..3, 40),
        lower in 0.0f64..0.5,
        upper in 1.5f64..4.0,
    ) {
        let cells: Vec<i64> = codes[..weights.len()].to_vec();
        let w = Weight::from_base(Array1::from(weights.clone())).unwrap();
        let classes = ClassMap::from_codes(&cells);
        let trimmed = trim(&w, &classes, TrimBounds::new(lower, upper).unwrap()).unwrap();

        let before = cell_totals(&weights, &cells);
        let after = cell_totals(trimmed.values().as_slice().unwrap(), &cells);
        for (c, total) in &before {
            prop_assert!((after[c] - total).abs() <= 1e-9 * total);
        }

        let counts = cells.iter().fold(BTreeMap::new(), |mut m, c| {
            *m.entry(*c).or_insert(0usize) += 1;
            m
        });
        for (i, &c) in cells.iter().enumerate() {
            let mean = before[&c] / counts[&c] as f64;
            let v = trimmed.values()[i];
            prop_assert!(v <= upper * mean * (1.0 + 1e-9));
            prop_assert!(v >= lower * mean * (1.0 - 1e-9));
        }
    }
}
