// src/estimation/domain.rs

use ndarray::{Array1, ArrayView1};

use crate::design::Sample;
use crate::error::{check_len, Result};

/// Subpopulation restriction. Units outside the mask keep their weights in
/// every table; estimators simply stop summing over them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainMask {
    pub label: String,
    pub mask: Vec<bool>,
}

impl DomainMask {
    pub fn new(label: impl Into<String>, mask: Vec<bool>) -> Self {
        DomainMask { label: label.into(), mask }
    }

    /// Units whose record satisfies `predicate`.
    pub fn from_predicate<F>(label: impl Into<String>, sample: &Sample, predicate: F) -> Self
    where
        F: Fn(&crate::design::SampleUnit) -> bool,
    {
        let mask = sample.units().iter().map(|u| predicate(u)).collect();
        DomainMask::new(label, mask)
    }

    /// Units whose category variable `variable` equals `value`. The label
    /// is `variable=value`.
    pub fn from_category(sample: &Sample, variable: &str, value: &str) -> Result<Self> {
        let idx = sample.category_index(variable)?;
        let mask = sample.category(idx).into_iter().map(|c| c == value).collect();
        Ok(DomainMask::new(format!("{}={}", variable, value), mask))
    }

    /// One mask per distinct value of a category variable, sorted by value.
    pub fn partition(sample: &Sample, variable: &str) -> Result<Vec<Self>> {
        let idx = sample.category_index(variable)?;
        let values = sample.category(idx);
        let mut levels: Vec<&str> = values.clone();
        levels.sort_unstable();
        levels.dedup();

        Ok(levels
            .into_iter()
            .map(|level| {
                let mask = values.iter().map(|&c| c == level).collect();
                DomainMask::new(format!("{}={}", variable, level), mask)
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.mask.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    pub fn contains(&self, unit: usize) -> bool {
        self.mask[unit]
    }

    /// Number of units in the domain.
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Weights with every unit outside the domain set to zero.
    pub fn apply(&self, weights: ArrayView1<f64>) -> Result<Array1<f64>> {
        check_len(weights.len(), self.mask.len())?;
        Ok(weights
            .iter()
            .zip(&self.mask)
            .map(|(&w, &m)| if m { w } else { 0.0 })
            .collect())
    }
}

/// Zero-outside-domain weights, or a plain copy without a domain.
pub(crate) fn restrict(weights: ArrayView1<f64>, domain: Option<&DomainMask>) -> Result<Array1<f64>> {
    match domain {
        Some(d) => d.apply(weights),
        None => Ok(weights.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::SampleUnit;
    use ndarray::array;

    fn sample() -> Sample {
        let units = ["n", "s", "n", "e"]
            .iter()
            .enumerate()
            .map(|(i, region)| {
                SampleUnit::new(format!("u{}", i), None, None, 0.5)
                    .with_outcomes(vec![i as f64])
                    .with_categories(vec![region.to_string()])
            })
            .collect();
        Sample::new(units, vec!["y".into()], vec![], vec!["region".into()]).unwrap()
    }

    #[test]
    fn test_from_category() {
        let d = DomainMask::from_category(&sample(), "region", "n").unwrap();
        assert_eq!(d.label, "region=n");
        assert_eq!(d.mask, vec![true, false, true, false]);
        assert_eq!(d.count(), 2);
    }

    #[test]
    fn test_partition_is_sorted_and_exhaustive() {
        let parts = DomainMask::partition(&sample(), "region").unwrap();
        let labels: Vec<&str> = parts.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["region=e", "region=n", "region=s"]);
        let covered: usize = parts.iter().map(|d| d.count()).sum();
        assert_eq!(covered, 4);
    }

    #[test]
    fn test_from_predicate() {
        let d = DomainMask::from_predicate("big", &sample(), |u| u.outcomes[0] >= 2.0);
        assert_eq!(d.mask, vec![false, false, true, true]);
    }

    #[test]
    fn test_apply_zeroes_outside() {
        let d = DomainMask::new("d", vec![true, false, true]);
        assert_eq!(d.apply(array![1.0, 2.0, 3.0].view()).unwrap(), array![1.0, 0.0, 3.0]);
        assert!(d.apply(array![1.0].view()).is_err());
    }

    #[test]
    fn test_unknown_variable() {
        assert!(DomainMask::from_category(&sample(), "sex", "f").is_err());
    }
}
