// src/weighting/trimming.rs

use ndarray::{Array1, ArrayView1};
use tracing::{debug, instrument};

use super::utils::ClassMap;
use super::weight::{AdjustmentStep, Weight};
use crate::config::TrimBounds;
use crate::error::{check_len, Result};

/// Solve `Σ clamp(s·w_i, lo, hi) = total` for the common scale `s`.
///
/// The left side is piecewise linear and nondecreasing in `s`; sweep its
/// breakpoints in order and solve on the segment that crosses `total`.
fn solve_scale(w: &[f64], lo: f64, hi: f64, total: f64) -> f64 {
    // (breakpoint, slope change, intercept change)
    let mut events: Vec<(f64, f64, f64)> = Vec::with_capacity(2 * w.len());
    let mut slope = 0.0;
    let mut intercept = 0.0;
    for &wi in w {
        if lo > 0.0 {
            intercept += lo;
            events.push((lo / wi, wi, -lo));
        } else {
            slope += wi;
        }
        events.push((hi / wi, -wi, hi));
    }
    events.sort_by(|a, b| a.0.total_cmp(&b.0));

    for &(s_next, d_slope, d_intercept) in &events {
        if slope > 0.0 {
            let s = (total - intercept) / slope;
            if s <= s_next {
                return s;
            }
        }
        slope += d_slope;
        intercept += d_intercept;
    }
    // every unit sits at `hi`; only reachable when total == n·hi
    events.last().map(|e| e.0).unwrap_or(1.0)
}

/// Trimmed values of one weight vector.
pub fn trim_values(weights: ArrayView1<f64>, cells: &ClassMap, bounds: TrimBounds) -> Result<Array1<f64>> {
    bounds.validate()?;
    check_len(weights.len(), cells.len())?;

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); cells.n_classes()];
    for (i, &c) in cells.indices().iter().enumerate() {
        if weights[i] > 0.0 {
            members[c].push(i);
        }
    }

    let mut trimmed = weights.to_owned();
    for (c, units) in members.iter().enumerate() {
        if units.is_empty() {
            continue;
        }
        let w: Vec<f64> = units.iter().map(|&i| weights[i]).collect();
        let total: f64 = w.iter().sum();
        let mean = total / w.len() as f64;
        let (lo, hi) = (bounds.lower * mean, bounds.upper * mean);

        if w.iter().all(|&wi| wi >= lo && wi <= hi) {
            continue;
        }

        let s = solve_scale(&w, lo, hi, total);
        let mut n_capped = 0;
        for (&i, &wi) in units.iter().zip(&w) {
            let v = (s * wi).clamp(lo, hi);
            if v == lo || v == hi {
                n_capped += 1;
            }
            trimmed[i] = v;
        }
        debug!(cell = cells.label(c), n_capped, scale = s, "cell trimmed");
    }

    Ok(trimmed)
}

/// Cap weights to `[lower, upper]` multiples of their cell mean and spread
/// the removed (or added) mass proportionally over the untrimmed units of
/// the same cell. Cell totals are preserved; zero weights stay zero.
#[instrument(skip_all, fields(n_cells = cells.n_classes(), lower = bounds.lower, upper = bounds.upper))]
pub fn trim(weight: &Weight, cells: &ClassMap, bounds: TrimBounds) -> Result<Weight> {
    let values = trim_values(weight.values(), cells, bounds)?;
    weight.adjust_to(AdjustmentStep::Trimming, values)
}
