// src/weighting/utils.rs

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::collections::BTreeMap;

/// Dense mapping of arbitrary cell labels to `0..n_classes`.
///
/// Labels are sorted, so class `c` always refers to the same label regardless
/// of the row order of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMap {
    indices: Vec<usize>,
    labels: Vec<String>,
}

impl ClassMap {
    pub fn from_labels<S: AsRef<str>>(values: &[S]) -> Self {
        let mut ids: BTreeMap<&str, usize> = BTreeMap::new();
        for v in values {
            ids.entry(v.as_ref()).or_insert(0);
        }
        for (next, id) in ids.values_mut().enumerate() {
            *id = next;
        }
        let indices = values.iter().map(|v| ids[v.as_ref()]).collect();
        let labels = ids.keys().map(|k| k.to_string()).collect();
        ClassMap { indices, labels }
    }

    /// Integer-coded cells, ordered numerically rather than lexically.
    pub fn from_codes(values: &[i64]) -> Self {
        let mut ids: BTreeMap<i64, usize> = values.iter().map(|&v| (v, 0)).collect();
        for (next, id) in ids.values_mut().enumerate() {
            *id = next;
        }
        let indices = values.iter().map(|v| ids[v]).collect();
        let labels = ids.keys().map(|k| k.to_string()).collect();
        ClassMap { indices, labels }
    }

    /// Classes from precomputed dense indices and their labels.
    pub fn from_parts(indices: Vec<usize>, labels: Vec<String>) -> crate::error::Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&c| c >= labels.len()) {
            return Err(crate::error::SurveyError::InvalidInput(format!(
                "class index {} out of range for {} labels",
                bad,
                labels.len()
            )));
        }
        Ok(ClassMap { indices, labels })
    }

    /// One class holding every unit.
    pub fn single(n_units: usize) -> Self {
        ClassMap { indices: vec![0; n_units], labels: vec!["all".to_string()] }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, class: usize) -> &str {
        &self.labels[class]
    }

    pub fn n_classes(&self) -> usize {
        self.labels.len()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes()];
        for &c in &self.indices {
            counts[c] += 1;
        }
        counts
    }
}

/// Sum weights by group for a 1D array
pub fn sum_by_group_1d(weights: ArrayView1<f64>, indices: &[usize], n_groups: usize) -> Array1<f64> {
    let mut sums = Array1::zeros(n_groups);

    for (i, &group_id) in indices.iter().enumerate() {
        sums[group_id] += weights[i];
    }

    sums
}

/// Sum rows by group for a 2D array (each column separately)
pub fn sum_by_group_2d(values: ArrayView2<f64>, indices: &[usize], n_groups: usize) -> Array2<f64> {
    let n_cols = values.ncols();
    let mut sums = Array2::zeros((n_groups, n_cols));

    for (row_idx, &group_id) in indices.iter().enumerate() {
        for col_idx in 0..n_cols {
            sums[[group_id, col_idx]] += values[[row_idx, col_idx]];
        }
    }

    sums
}

/// Elimination step at which the pivot vanished. The step index is the
/// position of the first unknown that is linearly dependent on earlier ones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingularPivot {
    pub column: usize,
    pub pivot: f64,
}

/// Pivots below this fraction of the largest diagonal entry count as zero.
pub const PIVOT_TOLERANCE: f64 = 1e-10;

/// Solve `A x = b` by Gaussian elimination with partial pivoting.
///
/// No regularisation is attempted: a (relatively) vanishing pivot is
/// reported to the caller.
pub fn solve_linear_system(
    a: ArrayView2<f64>,
    b: ArrayView1<f64>,
) -> std::result::Result<Array1<f64>, SingularPivot> {
    let n = a.nrows();

    let scale = (0..n).map(|i| a[[i, i]].abs()).fold(0.0_f64, f64::max);
    let threshold = if scale > 0.0 { scale * PIVOT_TOLERANCE } else { PIVOT_TOLERANCE };

    // Augmented matrix [A|b]
    let mut aug = Array2::zeros((n, n + 1));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = a[[i, j]];
        }
        aug[[i, n]] = b[i];
    }

    for k in 0..n {
        let mut max_val = aug[[k, k]].abs();
        let mut max_row = k;
        for i in (k + 1)..n {
            let val = aug[[i, k]].abs();
            if val > max_val {
                max_val = val;
                max_row = i;
            }
        }

        if max_val < threshold {
            return Err(SingularPivot { column: k, pivot: max_val });
        }

        if max_row != k {
            for j in 0..=n {
                aug.swap([k, j], [max_row, j]);
            }
        }

        for i in (k + 1)..n {
            let factor = aug[[i, k]] / aug[[k, k]];
            for j in k..=n {
                aug[[i, j]] -= factor * aug[[k, j]];
            }
        }
    }

    // Back substitution
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = aug[[i, n]];
        for j in (i + 1)..n {
            sum -= aug[[i, j]] * x[j];
        }
        x[i] = sum / aug[[i, i]];
    }

    Ok(x)
}

/// Weighted cross-product `Σ w_k x_k x_kᵀ` over the rows of `x`.
pub fn weighted_crossprod(w: ArrayView1<f64>, x: ArrayView2<f64>) -> Array2<f64> {
    let p = x.ncols();
    let mut s = Array2::zeros((p, p));
    for (i, row) in x.outer_iter().enumerate() {
        let wi = w[i];
        if wi == 0.0 {
            continue;
        }
        for j1 in 0..p {
            let a = wi * row[j1];
            for j2 in j1..p {
                s[[j1, j2]] += a * row[j2];
            }
        }
    }
    for j1 in 0..p {
        for j2 in 0..j1 {
            s[[j1, j2]] = s[[j2, j1]];
        }
    }
    s
}

/// Weighted column totals `Σ w_k x_k`.
pub fn weighted_totals(w: ArrayView1<f64>, x: ArrayView2<f64>) -> Array1<f64> {
    x.t().dot(&w)
}
