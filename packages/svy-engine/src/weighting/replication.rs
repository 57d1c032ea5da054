// src/weighting/replication.rs
//
// Replicate weight creation for variance estimation:
// - Jackknife (delete-one-cluster, JKn)
// - BRR and Fay's BRR from a Hadamard design
// - Stratified cluster bootstrap, optionally Rao-Wu rescaled

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::hadamard;
use super::weight::Weight;
use crate::config::{CollapseRule, ReplicationMethod};
use crate::design::{Design, GLOBAL_STRATUM};
use crate::error::{check_len, Result, SurveyError};

// ============================================================================
// Table
// ============================================================================

/// Identity of one replicate column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicateColumn {
    pub name: String,
    /// Stratum perturbed by this column (jackknife only).
    pub stratum: Option<String>,
    /// 1-based replicate index.
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Single-cluster stratum: no within-stratum variation to replicate.
    Certainty,
    /// Every unit of the stratum has zero weight.
    ZeroWeight,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedStratum {
    pub label: String,
    pub reason: ExclusionReason,
}

/// Strata and units that contribute no replication variance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplicationDiagnostics {
    pub excluded_strata: Vec<ExcludedStratum>,
    pub zero_weight_units: Vec<usize>,
}

/// Replicate weights: one row per unit, one column per replicate, plus the
/// per-column variance coefficients `c_r` in `Σ_r c_r (θ_r - θ)²`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicateWeightTable {
    weights: Array2<f64>,
    columns: Vec<ReplicateColumn>,
    coefficients: Vec<f64>,
    method: ReplicationMethod,
    diagnostics: ReplicationDiagnostics,
}

impl ReplicateWeightTable {
    pub fn weights(&self) -> ArrayView2<'_, f64> {
        self.weights.view()
    }

    pub fn column(&self, r: usize) -> ArrayView1<'_, f64> {
        self.weights.column(r)
    }

    pub fn columns(&self) -> &[ReplicateColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn method(&self) -> &ReplicationMethod {
        &self.method
    }

    pub fn diagnostics(&self) -> &ReplicationDiagnostics {
        &self.diagnostics
    }

    pub fn n_replicates(&self) -> usize {
        self.columns.len()
    }

    pub fn n_units(&self) -> usize {
        self.weights.nrows()
    }

    /// Apply a per-column weight transformation (nonresponse, calibration)
    /// to every replicate independently, in parallel.
    pub fn map_columns<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(ArrayView1<f64>) -> Result<Array1<f64>> + Sync,
    {
        let cols: Vec<Array1<f64>> = (0..self.n_replicates())
            .into_par_iter()
            .map(|r| f(self.weights.column(r)))
            .collect::<Result<_>>()?;

        let mut weights = Array2::zeros(self.weights.dim());
        for (r, col) in cols.iter().enumerate() {
            check_len(self.n_units(), col.len())?;
            weights.column_mut(r).assign(col);
        }
        Ok(ReplicateWeightTable { weights, ..self.clone() })
    }
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Clone)]
enum Scheme {
    /// `(stratum, deleted cluster)` per column and the inflation of each stratum.
    Jackknife { deleted: Vec<(usize, usize)>, inflation: Vec<f64> },
    /// Hadamard matrix and, per cluster, its pseudo-stratum and half (+1 / -1).
    Balanced { epsilon: f64, hadamard: Array2<f64>, assignment: Vec<Option<(usize, f64)>> },
    /// Clusters of every resampled stratum.
    Bootstrap { seed: u64, rescale: bool, strata: Vec<Vec<usize>> },
}

/// Everything needed to produce any single replicate column.
///
/// Columns are independent: `plan.column(&weight, r)` only reads the plan
/// and the full-sample weight, so callers may evaluate them in any order or
/// on any thread.
#[derive(Debug, Clone)]
pub struct ReplicatePlan {
    method: ReplicationMethod,
    stratum_of: Vec<usize>,
    cluster_of: Vec<usize>,
    scheme: Scheme,
    columns: Vec<ReplicateColumn>,
    coefficients: Vec<f64>,
    diagnostics: ReplicationDiagnostics,
}

impl ReplicatePlan {
    #[instrument(skip_all, fields(method = method.name()))]
    pub fn new(design: &Design, weight: &Weight, method: &ReplicationMethod) -> Result<Self> {
        method.validate()?;
        check_len(design.n_units(), weight.len())?;

        let mut diagnostics = ReplicationDiagnostics {
            excluded_strata: Vec::new(),
            zero_weight_units: (0..weight.len()).filter(|&i| weight.is_excluded(i)).collect(),
        };

        let (scheme, columns, coefficients) = match method {
            ReplicationMethod::Jackknife => jackknife_scheme(design, weight, &mut diagnostics),
            ReplicationMethod::Brr { collapse } | ReplicationMethod::Fay { collapse, .. } => {
                let epsilon = method.epsilon().unwrap_or(1.0);
                balanced_scheme(design, *collapse, epsilon, method.prefix())?
            }
            ReplicationMethod::Bootstrap { replicates, seed, rescale } => {
                bootstrap_scheme(design, *replicates, *seed, *rescale, &mut diagnostics)
            }
        };

        for excluded in &diagnostics.excluded_strata {
            warn!(stratum = %excluded.label, reason = ?excluded.reason, "stratum excluded from replication");
        }
        if columns.is_empty() {
            return Err(SurveyError::DesignSpec(
                "no stratum has more than one cluster with positive weight; nothing to replicate".into(),
            ));
        }
        debug!(n_replicates = columns.len(), "replicate plan built");

        Ok(ReplicatePlan {
            method: *method,
            stratum_of: design.stratum_indices().to_vec(),
            cluster_of: design.cluster_indices().to_vec(),
            scheme,
            columns,
            coefficients,
            diagnostics,
        })
    }

    pub fn n_replicates(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ReplicateColumn] {
        &self.columns
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn diagnostics(&self) -> &ReplicationDiagnostics {
        &self.diagnostics
    }

    /// Replicate `r` of `weight`.
    pub fn column(&self, weight: ArrayView1<f64>, r: usize) -> Array1<f64> {
        let mut rep = weight.to_owned();
        match &self.scheme {
            Scheme::Jackknife { deleted, inflation } => {
                let (h, dropped) = deleted[r];
                for (i, w) in rep.iter_mut().enumerate() {
                    if self.stratum_of[i] == h {
                        *w = if self.cluster_of[i] == dropped { 0.0 } else { *w * inflation[h] };
                    }
                }
            }
            Scheme::Balanced { epsilon, hadamard, assignment } => {
                for (i, w) in rep.iter_mut().enumerate() {
                    if let Some((pseudo, half)) = assignment[self.cluster_of[i]] {
                        // column 0 of the Hadamard matrix is constant
                        let delta = hadamard[[r, pseudo + 1]];
                        *w *= 1.0 + epsilon * delta * half;
                    }
                }
            }
            Scheme::Bootstrap { seed, rescale, strata } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(r as u64));
                let n_clusters = self.cluster_of.iter().copied().max().map_or(0, |m| m + 1);
                let mut factor = vec![1.0; n_clusters];
                for clusters in strata {
                    let n_h = clusters.len();
                    let draws = if *rescale { n_h - 1 } else { n_h };
                    let scale = if *rescale { n_h as f64 / (n_h as f64 - 1.0) } else { 1.0 };
                    let mut counts = vec![0usize; n_h];
                    for _ in 0..draws {
                        counts[rng.gen_range(0..n_h)] += 1;
                    }
                    for (&c, &k) in clusters.iter().zip(&counts) {
                        factor[c] = scale * k as f64;
                    }
                }
                for (i, w) in rep.iter_mut().enumerate() {
                    *w *= factor[self.cluster_of[i]];
                }
            }
        }
        rep
    }

    /// Evaluate every column in parallel and assemble the table.
    pub fn build(self, weight: &Weight) -> Result<ReplicateWeightTable> {
        check_len(self.stratum_of.len(), weight.len())?;
        let values = weight.values();

        let cols: Vec<Array1<f64>> = (0..self.n_replicates())
            .into_par_iter()
            .map(|r| self.column(values, r))
            .collect();

        let mut weights = Array2::zeros((weight.len(), cols.len()));
        for (r, col) in cols.into_iter().enumerate() {
            weights.column_mut(r).assign(&col);
        }

        Ok(ReplicateWeightTable {
            weights,
            columns: self.columns,
            coefficients: self.coefficients,
            method: self.method,
            diagnostics: self.diagnostics,
        })
    }
}

/// Build the replicate weight table of `weight` under `design`.
pub fn make_replicates(design: &Design, weight: &Weight, method: &ReplicationMethod) -> Result<ReplicateWeightTable> {
    ReplicatePlan::new(design, weight, method)?.build(weight)
}

fn stratum_weight(design: &Design, weight: &Weight, h: usize) -> f64 {
    design.strata()[h]
        .clusters
        .iter()
        .flat_map(|&c| design.clusters()[c].units.iter())
        .map(|&i| weight.values()[i])
        .sum()
}

// ============================================================================
// Jackknife
// ============================================================================

fn jackknife_scheme(
    design: &Design,
    weight: &Weight,
    diagnostics: &mut ReplicationDiagnostics,
) -> (Scheme, Vec<ReplicateColumn>, Vec<f64>) {
    let unstratified = design.strata().len() == 1 && design.strata()[0].label == GLOBAL_STRATUM;
    let mut deleted = Vec::new();
    let mut columns = Vec::new();
    let mut coefficients = Vec::new();
    let mut inflation = vec![1.0; design.strata().len()];

    for (h, stratum) in design.strata().iter().enumerate() {
        let n_h = stratum.n_clusters();
        if n_h < 2 {
            diagnostics
                .excluded_strata
                .push(ExcludedStratum { label: stratum.label.clone(), reason: ExclusionReason::Certainty });
            continue;
        }
        if stratum_weight(design, weight, h) <= 0.0 {
            diagnostics
                .excluded_strata
                .push(ExcludedStratum { label: stratum.label.clone(), reason: ExclusionReason::ZeroWeight });
            continue;
        }

        let n = n_h as f64;
        inflation[h] = n / (n - 1.0);
        for (k, &c) in stratum.clusters.iter().enumerate() {
            let index = columns.len() + 1;
            let name = if unstratified {
                format!("_jk_wgt_{}", k + 1)
            } else {
                format!("_jk_wgt_{}_{}", stratum.label, k + 1)
            };
            columns.push(ReplicateColumn { name, stratum: Some(stratum.label.clone()), index });
            coefficients.push((n - 1.0) / n * stratum.fpc);
            deleted.push((h, c));
        }
    }

    (Scheme::Jackknife { deleted, inflation }, columns, coefficients)
}

// ============================================================================
// BRR / Fay
// ============================================================================

/// Split strata into 2-group pseudo-strata. Each entry holds the two halves.
fn pseudo_strata(design: &Design, collapse: CollapseRule) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    let unbalanced = |label: &str, clusters: usize| SurveyError::UnbalancedDesign {
        stratum: label.to_string(),
        clusters,
    };

    let mut pseudo = Vec::new();
    let mut pending_singleton: Option<(&str, usize)> = None;

    for stratum in design.strata() {
        let cl = &stratum.clusters;
        let n_h = cl.len();
        match (collapse, n_h) {
            (_, 2) => pseudo.push((vec![cl[0]], vec![cl[1]])),
            (CollapseRule::PairClusters, n) if n % 2 == 0 => {
                for pair in cl.chunks(2) {
                    pseudo.push((vec![pair[0]], vec![pair[1]]));
                }
            }
            (CollapseRule::HalveClusters, n) if n > 2 => {
                let mid = n.div_ceil(2);
                pseudo.push((cl[..mid].to_vec(), cl[mid..].to_vec()));
            }
            (CollapseRule::MergeSingletons, 1) => match pending_singleton.take() {
                Some((_, first)) => pseudo.push((vec![first], vec![cl[0]])),
                None => pending_singleton = Some((stratum.label.as_str(), cl[0])),
            },
            _ => return Err(unbalanced(&stratum.label, n_h)),
        }
    }

    if let Some((label, _)) = pending_singleton {
        return Err(unbalanced(label, 1));
    }
    Ok(pseudo)
}

fn balanced_scheme(
    design: &Design,
    collapse: CollapseRule,
    epsilon: f64,
    prefix: &str,
) -> Result<(Scheme, Vec<ReplicateColumn>, Vec<f64>)> {
    let pseudo = pseudo_strata(design, collapse)?;
    let hadamard = hadamard::for_strata(pseudo.len())?;
    let n_reps = hadamard.nrows();
    debug!(n_pseudo_strata = pseudo.len(), hadamard_order = n_reps, "balanced design");

    let mut assignment = vec![None; design.clusters().len()];
    for (p, (first, second)) in pseudo.iter().enumerate() {
        for &c in first {
            assignment[c] = Some((p, 1.0));
        }
        for &c in second {
            assignment[c] = Some((p, -1.0));
        }
    }

    let columns = (1..=n_reps)
        .map(|r| ReplicateColumn { name: format!("{}{}", prefix, r), stratum: None, index: r })
        .collect();
    let coefficients = vec![1.0 / (n_reps as f64 * epsilon * epsilon); n_reps];

    Ok((Scheme::Balanced { epsilon, hadamard, assignment }, columns, coefficients))
}

// ============================================================================
// Bootstrap
// ============================================================================

fn bootstrap_scheme(
    design: &Design,
    replicates: usize,
    seed: u64,
    rescale: bool,
    diagnostics: &mut ReplicationDiagnostics,
) -> (Scheme, Vec<ReplicateColumn>, Vec<f64>) {
    let mut strata = Vec::new();
    for stratum in design.strata() {
        if stratum.n_clusters() < 2 {
            diagnostics
                .excluded_strata
                .push(ExcludedStratum { label: stratum.label.clone(), reason: ExclusionReason::Certainty });
            continue;
        }
        strata.push(stratum.clusters.clone());
    }

    let columns = if strata.is_empty() {
        Vec::new()
    } else {
        (1..=replicates)
            .map(|r| ReplicateColumn { name: format!("_boot_wgt_{}", r), stratum: None, index: r })
            .collect()
    };
    let coefficients = vec![1.0 / replicates as f64; columns.len()];

    (Scheme::Bootstrap { seed, rescale, strata }, columns, coefficients)
}
