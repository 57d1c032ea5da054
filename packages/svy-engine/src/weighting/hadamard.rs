// src/weighting/hadamard.rs
//
// Hadamard matrices for balanced repeated replication. Orders are powers of
// two (Sylvester) or p + 1 with p prime and p ≡ 3 mod 4 (Paley type I).

use ndarray::Array2;

use crate::error::{Result, SurveyError};

/// Largest order searched before giving up.
const MAX_ORDER: usize = 1 << 16;

/// Sylvester recursion: H_2n = [[H_n, H_n], [H_n, -H_n]].
pub fn sylvester(n: usize) -> Array2<f64> {
    let mut h = Array2::from_elem((1, 1), 1.0);
    while h.nrows() < n {
        let size = h.nrows();
        let mut next = Array2::zeros((size * 2, size * 2));
        for i in 0..size {
            for j in 0..size {
                next[[i, j]] = h[[i, j]];
                next[[i, j + size]] = h[[i, j]];
                next[[i + size, j]] = h[[i, j]];
                next[[i + size, j + size]] = -h[[i, j]];
            }
        }
        h = next;
    }
    h
}

/// Paley type I construction of order `n = p + 1`.
pub fn paley(n: usize) -> Array2<f64> {
    let p = n - 1;
    let mut is_residue = vec![false; p];
    for i in 1..p {
        is_residue[(i * i) % p] = true;
    }

    let mut h = Array2::zeros((n, n));
    for j in 0..n {
        h[[0, j]] = 1.0;
        h[[j, 0]] = 1.0;
    }
    // lower-right block: Q - I, Q the Jacobsthal matrix
    for i in 0..p {
        for j in 0..p {
            h[[i + 1, j + 1]] = if i == j {
                -1.0
            } else if is_residue[(i + p - j) % p] {
                1.0
            } else {
                -1.0
            };
        }
    }
    h
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut i = 3;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 2;
    }
    true
}

fn construct(n: usize) -> Option<Array2<f64>> {
    if n == 1 || n == 2 || n.is_power_of_two() {
        return Some(sylvester(n));
    }
    if n % 4 == 0 && is_prime(n - 1) && (n - 1) % 4 == 3 {
        return Some(paley(n));
    }
    None
}

/// Smallest constructible Hadamard matrix with more than `n_strata` columns,
/// so that every stratum gets a non-constant column.
pub fn for_strata(n_strata: usize) -> Result<Array2<f64>> {
    (n_strata + 1..=MAX_ORDER)
        .find_map(construct)
        .ok_or_else(|| SurveyError::InvalidInput(format!("no Hadamard matrix for {} strata", n_strata)))
}
