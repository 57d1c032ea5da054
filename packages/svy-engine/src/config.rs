// src/config.rs
//
// Engine configuration knobs. Every type deserializes from the obvious
// serde shape and has a short string form for call sites that take
// user-supplied method names.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Result, SurveyError};

fn default_fay_epsilon() -> f64 {
    0.3
}

fn default_true() -> bool {
    true
}

fn default_bootstrap_replicates() -> usize {
    500
}

// ============================================================================
// Replication
// ============================================================================

/// How strata that do not hold exactly two clusters are turned into
/// BRR pseudo-strata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollapseRule {
    /// No collapsing; any stratum without exactly 2 clusters is an error.
    #[default]
    None,
    /// Split a stratum with an even number of clusters into consecutive pairs.
    PairClusters,
    /// Split the clusters of a stratum into two groups of (nearly) equal size.
    HalveClusters,
    /// Merge adjacent single-cluster strata pairwise into 2-cluster pseudo-strata.
    MergeSingletons,
}

/// Replicate weight method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ReplicationMethod {
    /// Delete-one-cluster jackknife (JKn).
    Jackknife,
    /// Classic balanced repeated replication (half-samples, factors 2 and 0).
    Brr {
        #[serde(default)]
        collapse: CollapseRule,
    },
    /// Fay's BRR: factors `1 ± epsilon`.
    Fay {
        #[serde(default = "default_fay_epsilon")]
        epsilon: f64,
        #[serde(default)]
        collapse: CollapseRule,
    },
    /// Stratified cluster bootstrap.
    Bootstrap {
        #[serde(default = "default_bootstrap_replicates")]
        replicates: usize,
        #[serde(default)]
        seed: u64,
        /// Rao-Wu rescaling: draw `n_h - 1` clusters and multiply by `n_h/(n_h-1)`.
        #[serde(default = "default_true")]
        rescale: bool,
    },
}

impl Default for ReplicationMethod {
    fn default() -> Self {
        ReplicationMethod::Jackknife
    }
}

impl ReplicationMethod {
    /// Perturbation size for the balanced methods (1 for classic BRR).
    pub fn epsilon(&self) -> Option<f64> {
        match self {
            ReplicationMethod::Brr { .. } => Some(1.0),
            ReplicationMethod::Fay { epsilon, .. } => Some(*epsilon),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ReplicationMethod::Fay { epsilon, .. } if !(*epsilon > 0.0 && *epsilon <= 1.0) => {
                Err(SurveyError::InvalidInput(format!(
                    "Fay epsilon must be in (0, 1], got {}",
                    epsilon
                )))
            }
            ReplicationMethod::Bootstrap { replicates, .. } if *replicates < 2 => {
                Err(SurveyError::InvalidInput("bootstrap requires at least 2 replicates".into()))
            }
            _ => Ok(()),
        }
    }

    /// Column-name prefix of the replicate table.
    pub fn prefix(&self) -> &'static str {
        match self {
            ReplicationMethod::Jackknife => "_jk_wgt_",
            ReplicationMethod::Brr { .. } => "_brr_wgt_",
            ReplicationMethod::Fay { .. } => "_fay_wgt_",
            ReplicationMethod::Bootstrap { .. } => "_boot_wgt_",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReplicationMethod::Jackknife => "jackknife",
            ReplicationMethod::Brr { .. } => "brr",
            ReplicationMethod::Fay { .. } => "fay",
            ReplicationMethod::Bootstrap { .. } => "bootstrap",
        }
    }
}

impl FromStr for ReplicationMethod {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "jackknife" | "jk" | "jkn" | "jk1" => Ok(ReplicationMethod::Jackknife),
            "brr" => Ok(ReplicationMethod::Brr { collapse: CollapseRule::None }),
            "fay" => Ok(ReplicationMethod::Fay {
                epsilon: default_fay_epsilon(),
                collapse: CollapseRule::None,
            }),
            "bootstrap" | "bs" => Ok(ReplicationMethod::Bootstrap {
                replicates: default_bootstrap_replicates(),
                seed: 0,
                rescale: true,
            }),
            other => Err(SurveyError::InvalidInput(format!(
                "unknown replication method '{}'; expected jackknife, brr, fay or bootstrap",
                other
            ))),
        }
    }
}

// ============================================================================
// Calibration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Linear (chi-square distance) calibration, closed form.
    Greg,
    /// Iterative proportional fitting over categorical margins.
    Raking {
        #[serde(default = "CalibrationMethod::default_tolerance")]
        tolerance: f64,
        #[serde(default = "CalibrationMethod::default_max_iterations")]
        max_iterations: usize,
    },
}

impl CalibrationMethod {
    fn default_tolerance() -> f64 {
        1e-6
    }

    fn default_max_iterations() -> usize {
        100
    }

    pub fn raking() -> Self {
        CalibrationMethod::Raking {
            tolerance: Self::default_tolerance(),
            max_iterations: Self::default_max_iterations(),
        }
    }
}

impl Default for CalibrationMethod {
    fn default() -> Self {
        CalibrationMethod::Greg
    }
}

impl FromStr for CalibrationMethod {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "greg" | "linear" => Ok(CalibrationMethod::Greg),
            "raking" | "rake" | "ipf" => Ok(CalibrationMethod::raking()),
            other => Err(SurveyError::InvalidInput(format!(
                "unknown calibration method '{}'; expected greg or raking",
                other
            ))),
        }
    }
}

/// Range of calibration factors `g = w_cal / w` considered unremarkable.
/// Factors outside it are reported, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorBounds {
    pub lower: f64,
    pub upper: f64,
}

impl Default for FactorBounds {
    fn default() -> Self {
        FactorBounds { lower: 0.3, upper: 3.0 }
    }
}

impl FactorBounds {
    pub fn contains(&self, g: f64) -> bool {
        g >= self.lower && g <= self.upper
    }
}

// ============================================================================
// Trimming
// ============================================================================

/// Trimming bounds as multiples of the cell mean weight (default `[0, 3.5]`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimBounds {
    #[serde(default)]
    pub lower: f64,
    #[serde(default = "TrimBounds::default_upper")]
    pub upper: f64,
}

impl TrimBounds {
    fn default_upper() -> f64 {
        3.5
    }

    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        let bounds = TrimBounds { lower, upper };
        bounds.validate()?;
        Ok(bounds)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lower >= 0.0 && self.lower <= 1.0) {
            return Err(SurveyError::InvalidInput(format!(
                "trim lower bound must be in [0, 1] cell means, got {}",
                self.lower
            )));
        }
        if !(self.upper >= 1.0) || !self.upper.is_finite() {
            return Err(SurveyError::InvalidInput(format!(
                "trim upper bound must be a finite multiple >= 1 of the cell mean, got {}",
                self.upper
            )));
        }
        Ok(())
    }
}

impl Default for TrimBounds {
    fn default() -> Self {
        TrimBounds { lower: 0.0, upper: Self::default_upper() }
    }
}

// ============================================================================
// Variance
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiMethod {
    /// Normal quantiles.
    #[default]
    Wald,
    /// Student-t quantiles with design degrees of freedom `Σ_h (n_h - 1)`.
    T,
}

impl FromStr for CiMethod {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "wald" | "normal" | "z" => Ok(CiMethod::Wald),
            "t" | "student" => Ok(CiMethod::T),
            other => Err(SurveyError::InvalidInput(format!("unknown CI method '{}'", other))),
        }
    }
}

/// Centering point of the replicate variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceCenter {
    /// `Σ c_r (θ_r - θ_full)²`
    #[default]
    FullSample,
    /// `Σ c_r (θ_r - mean(θ_r))²`
    ReplicateMean,
}

impl FromStr for VarianceCenter {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full_sample" | "fullsample" | "full" | "estimate" | "mse" => Ok(VarianceCenter::FullSample),
            "rep_mean" | "repmean" | "mean" | "average" | "replicates" => Ok(VarianceCenter::ReplicateMean),
            other => Err(SurveyError::InvalidInput(format!("unknown variance center '{}'", other))),
        }
    }
}

/// Treatment of strata with a single cluster in Taylor variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingletonMethod {
    /// Zero variance contribution (certainty stratum).
    #[default]
    Skip,
    /// Deviation of the lone cluster total from the grand mean of cluster totals.
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceConfig {
    #[serde(default)]
    pub ci: CiMethod,
    #[serde(default = "VarianceConfig::default_level")]
    pub confidence_level: f64,
    #[serde(default)]
    pub center: VarianceCenter,
    #[serde(default)]
    pub singleton: SingletonMethod,
}

impl VarianceConfig {
    fn default_level() -> f64 {
        0.95
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(SurveyError::InvalidInput(format!(
                "confidence level must be in (0, 1), got {}",
                self.confidence_level
            )));
        }
        Ok(())
    }
}

impl Default for VarianceConfig {
    fn default() -> Self {
        VarianceConfig {
            ci: CiMethod::Wald,
            confidence_level: Self::default_level(),
            center: VarianceCenter::FullSample,
            singleton: SingletonMethod::Skip,
        }
    }
}
