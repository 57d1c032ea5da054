// src/estimation/variance.rs

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use tracing::{debug, instrument, warn};

use super::domain::{restrict, DomainMask};
use super::estimator::Parameter;
use super::replication::{replicate_estimates, replication_covariance};
use super::taylor::{srs_variance, taylor_covariance};
use crate::config::{CiMethod, ReplicationMethod, VarianceConfig};
use crate::design::{Design, Sample};
use crate::error::{check_len, Result, SurveyError};
use crate::weighting::ReplicateWeightTable;

// ============================================================================
// Enums & Config
// ============================================================================

/// Which variance estimator to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceStrategy {
    Taylor,
    Replication,
    /// Taylor when the estimator can be linearized, otherwise replication.
    #[default]
    Auto,
}

impl FromStr for VarianceStrategy {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "taylor" | "linearization" => Ok(VarianceStrategy::Taylor),
            "replication" | "rep" => Ok(VarianceStrategy::Replication),
            "auto" => Ok(VarianceStrategy::Auto),
            other => Err(SurveyError::InvalidInput(format!("unknown variance strategy '{}'", other))),
        }
    }
}

/// How an [`Estimate`]'s variance was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceMethod {
    Taylor,
    Jackknife,
    Brr,
    Fay,
    Bootstrap,
}

impl VarianceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarianceMethod::Taylor => "taylor",
            VarianceMethod::Jackknife => "jackknife",
            VarianceMethod::Brr => "brr",
            VarianceMethod::Fay => "fay",
            VarianceMethod::Bootstrap => "bootstrap",
        }
    }
}

impl From<&ReplicationMethod> for VarianceMethod {
    fn from(method: &ReplicationMethod) -> Self {
        match method {
            ReplicationMethod::Jackknife => VarianceMethod::Jackknife,
            ReplicationMethod::Brr { .. } => VarianceMethod::Brr,
            ReplicationMethod::Fay { .. } => VarianceMethod::Fay,
            ReplicationMethod::Bootstrap { .. } => VarianceMethod::Bootstrap,
        }
    }
}

impl fmt::Display for VarianceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Estimate
// ============================================================================

/// One estimated component with its design-based precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub label: String,
    pub domain: Option<String>,
    pub point: f64,
    pub variance: f64,
    pub std_error: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    /// Design degrees of freedom `Σ_h (n_h - 1)`.
    pub dof: usize,
    pub method: VarianceMethod,
    /// `std_error / |point|`
    pub cv: f64,
    /// Design variance over the SRS variance of the same estimator.
    pub deff: f64,
    /// Units with positive weight in the domain.
    pub n: usize,
    /// Replicates in which the estimator was undefined. Any such replicate
    /// makes the variance NaN.
    #[serde(default)]
    pub undefined_replicates: usize,
}

// ============================================================================
// Estimator
// ============================================================================

/// Design-based variance estimation for one design and configuration.
#[derive(Debug, Clone)]
pub struct VarianceEstimator<'a> {
    design: &'a Design,
    config: VarianceConfig,
}

impl<'a> VarianceEstimator<'a> {
    pub fn new(design: &'a Design, config: VarianceConfig) -> Result<Self> {
        config.validate()?;
        Ok(VarianceEstimator { design, config })
    }

    pub fn design(&self) -> &Design {
        self.design
    }

    pub fn config(&self) -> &VarianceConfig {
        &self.config
    }

    /// Taylor linearization. Fails with `UnsupportedEstimator` for
    /// estimators without a closed-form derivative.
    #[instrument(skip_all, fields(parameter = parameter.kind()))]
    pub fn taylor(
        &self,
        parameter: &Parameter,
        sample: &Sample,
        weights: ArrayView1<f64>,
        domain: Option<&DomainMask>,
    ) -> Result<Vec<Estimate>> {
        check_len(self.design.n_units(), sample.len())?;
        let point = parameter.point(sample, weights, domain)?;
        let scores = parameter.scores(sample, weights, domain)?;
        let cov = taylor_covariance(self.design, scores.view(), self.config.singleton)?;
        self.summarize(parameter, sample, weights, domain, point, &cov, VarianceMethod::Taylor, 0)
    }

    /// Replication variance over the columns of `table`.
    #[instrument(skip_all, fields(parameter = parameter.kind(), method = table.method().name()))]
    pub fn replication(
        &self,
        parameter: &Parameter,
        sample: &Sample,
        weights: ArrayView1<f64>,
        table: &ReplicateWeightTable,
        domain: Option<&DomainMask>,
    ) -> Result<Vec<Estimate>> {
        check_len(self.design.n_units(), sample.len())?;
        let point = parameter.point(sample, weights, domain)?;
        let replicates = replicate_estimates(parameter, sample, table, domain)?;
        let undefined = replicates.outer_iter().filter(|row| row.iter().any(|v| v.is_nan())).count();
        if undefined > 0 {
            warn!(undefined, n_replicates = table.n_replicates(), "replication variance is undefined");
        }
        let cov = replication_covariance(point.view(), replicates.view(), table.coefficients(), self.config.center)?;
        self.summarize(parameter, sample, weights, domain, point, &cov, table.method().into(), undefined)
    }

    /// Dispatch on `strategy`. `Auto` prefers Taylor, falls back to
    /// replication when a table is given, and otherwise reports the
    /// estimator as unsupported.
    pub fn estimate(
        &self,
        parameter: &Parameter,
        sample: &Sample,
        weights: ArrayView1<f64>,
        table: Option<&ReplicateWeightTable>,
        domain: Option<&DomainMask>,
        strategy: VarianceStrategy,
    ) -> Result<Vec<Estimate>> {
        let use_taylor = match strategy {
            VarianceStrategy::Taylor => true,
            VarianceStrategy::Replication => false,
            VarianceStrategy::Auto => parameter.supports_linearization(),
        };
        if use_taylor {
            return self.taylor(parameter, sample, weights, domain);
        }

        match table {
            Some(table) => {
                debug!(parameter = parameter.kind(), "using replication variance");
                self.replication(parameter, sample, weights, table, domain)
            }
            None => Err(SurveyError::UnsupportedEstimator(format!(
                "{} estimator needs replicate weights for variance estimation",
                parameter.kind()
            ))),
        }
    }

    /// Estimates for every domain in `domains`, in order.
    pub fn estimate_domains(
        &self,
        parameter: &Parameter,
        sample: &Sample,
        weights: ArrayView1<f64>,
        table: Option<&ReplicateWeightTable>,
        domains: &[DomainMask],
        strategy: VarianceStrategy,
    ) -> Result<Vec<Estimate>> {
        let mut out = Vec::new();
        for domain in domains {
            out.extend(self.estimate(parameter, sample, weights, table, Some(domain), strategy)?);
        }
        Ok(out)
    }

    /// Two-sided critical value for the configured CI method and level.
    pub fn critical_value(&self) -> Result<f64> {
        let alpha = 1.0 - self.config.confidence_level;
        match self.config.ci {
            CiMethod::Wald => {
                let normal = Normal::new(0.0, 1.0)
                    .map_err(|e| SurveyError::InvalidInput(format!("normal distribution: {}", e)))?;
                Ok(normal.inverse_cdf(1.0 - alpha / 2.0))
            }
            CiMethod::T => {
                let df = self.design.degrees_of_freedom();
                if df == 0 {
                    return Err(SurveyError::InvalidInput(
                        "t interval needs at least one design degree of freedom".into(),
                    ));
                }
                let t = StudentsT::new(0.0, 1.0, df as f64)
                    .map_err(|e| SurveyError::InvalidInput(format!("t distribution: {}", e)))?;
                Ok(t.inverse_cdf(1.0 - alpha / 2.0))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn summarize(
        &self,
        parameter: &Parameter,
        sample: &Sample,
        weights: ArrayView1<f64>,
        domain: Option<&DomainMask>,
        point: Array1<f64>,
        cov: &Array2<f64>,
        method: VarianceMethod,
        undefined_replicates: usize,
    ) -> Result<Vec<Estimate>> {
        let critical = self.critical_value()?;
        let srs = srs_variance(parameter, sample, weights, domain)?;
        let n = restrict(weights, domain)?.iter().filter(|&&w| w > 0.0).count();
        let dof = self.design.degrees_of_freedom();

        let estimates = parameter
            .component_labels(sample)
            .into_iter()
            .enumerate()
            .map(|(j, label)| {
                let v = cov[[j, j]];
                let variance = if v.is_nan() { v } else { v.max(0.0) };
                let std_error = variance.sqrt();
                let margin = critical * std_error;
                Estimate {
                    label,
                    domain: domain.map(|d| d.label.clone()),
                    point: point[j],
                    variance,
                    std_error,
                    ci_low: point[j] - margin,
                    ci_high: point[j] + margin,
                    dof,
                    method,
                    cv: if point[j] != 0.0 { std_error / point[j].abs() } else { f64::NAN },
                    deff: if srs[j] > 0.0 { variance / srs[j] } else { f64::NAN },
                    n,
                    undefined_replicates,
                }
            })
            .collect();
        Ok(estimates)
    }
}
