// src/weighting/weight.rs
//
// Immutable weight vector with its adjustment history.

use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{check_len, Result, SurveyError};

/// Kind of adjustment recorded in a weight's factor chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStep {
    Nonresponse,
    Trimming,
    Normalization,
    Poststratification,
    Greg,
    Raking,
}

/// One applied adjustment: per-unit multiplicative factors.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentRecord {
    pub step: AdjustmentStep,
    pub factors: Array1<f64>,
}

/// Sampling weights aligned with the sample units.
///
/// A `Weight` is never mutated. Every adjustment returns a new value whose
/// chain has one more record, so `values == base * Π factors` can always be
/// checked with [`Weight::reconstruct`]. A zero weight marks an explicit
/// exclusion (nonrespondent, out of domain of a replicate), not missing data.
#[derive(Debug, Clone, PartialEq)]
pub struct Weight {
    base: Array1<f64>,
    values: Array1<f64>,
    chain: Vec<AdjustmentRecord>,
}

impl Weight {
    /// Design weights with no adjustment applied.
    pub fn from_base(base: Array1<f64>) -> Result<Self> {
        if let Some(i) = base.iter().position(|w| !w.is_finite() || *w < 0.0) {
            return Err(SurveyError::InvalidInput(format!(
                "design weight of unit {} is {}",
                i, base[i]
            )));
        }
        Ok(Weight { values: base.clone(), base, chain: Vec::new() })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }

    pub fn base(&self) -> ArrayView1<'_, f64> {
        self.base.view()
    }

    pub fn chain(&self) -> &[AdjustmentRecord] {
        &self.chain
    }

    pub fn total(&self) -> f64 {
        self.values.sum()
    }

    pub fn is_excluded(&self, unit: usize) -> bool {
        self.values[unit] == 0.0
    }

    /// Apply per-unit factors, producing a new weight with the step recorded.
    pub fn adjust(&self, step: AdjustmentStep, factors: Array1<f64>) -> Result<Weight> {
        check_len(self.len(), factors.len())?;
        if let Some(i) = factors.iter().position(|f| !f.is_finite()) {
            return Err(SurveyError::InvalidInput(format!(
                "{:?} factor of unit {} is not finite",
                step, i
            )));
        }
        let values = &self.values * &factors;
        let mut chain = self.chain.clone();
        chain.push(AdjustmentRecord { step, factors });
        Ok(Weight { base: self.base.clone(), values, chain })
    }

    /// Replace the values by `target`, recording `target / current` as the
    /// step's factors. Units already at zero must stay at zero; they keep
    /// factor 1.
    pub(crate) fn adjust_to(&self, step: AdjustmentStep, target: Array1<f64>) -> Result<Weight> {
        check_len(self.len(), target.len())?;
        if let Some(i) = (0..self.len()).find(|&i| self.values[i] == 0.0 && target[i] != 0.0) {
            return Err(SurveyError::InvalidInput(format!(
                "{:?} cannot give weight {} to unit {}, whose weight is zero",
                step, target[i], i
            )));
        }
        let mut factors = Array1::ones(self.len());
        Zip::from(&mut factors)
            .and(&self.values)
            .and(&target)
            .for_each(|f, &old, &new| {
                if old != 0.0 {
                    *f = new / old;
                }
            });
        self.adjust(step, factors)
    }

    /// Recompute the values from the base weights and the factor chain.
    pub fn reconstruct(&self) -> Array1<f64> {
        self.chain.iter().fold(self.base.clone(), |acc, record| acc * &record.factors)
    }

    /// Product of all factors applied so far.
    pub fn cumulative_factors(&self) -> Array1<f64> {
        self.chain
            .iter()
            .fold(Array1::ones(self.len()), |acc, record| acc * &record.factors)
    }
}
