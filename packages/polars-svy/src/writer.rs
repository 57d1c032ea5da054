// src/writer.rs

use polars::prelude::*;
use svy_engine::weighting::ReplicateWeightTable;
use svy_engine::{Estimate, Weight};

use crate::error::Result;

// ============================================================================
// Weights
// ============================================================================

/// The final weight as a column aligned to the input rows.
pub fn weight_column(name: &str, weight: &Weight) -> Column {
    Column::new(name.into(), weight.values().to_vec())
}

/// `df` with the weight appended as column `name`.
pub fn with_weight(df: &DataFrame, name: &str, weight: &Weight) -> Result<DataFrame> {
    Ok(df.hstack(&[weight_column(name, weight)])?)
}

/// One column per replicate, named after the table's columns
/// (`_jk_wgt_<stratum>_<k>`, `_brr_wgt_<r>`, `_fay_wgt_<r>`, `_boot_wgt_<r>`).
pub fn replicate_frame(table: &ReplicateWeightTable) -> Result<DataFrame> {
    let columns = table
        .columns()
        .iter()
        .enumerate()
        .map(|(r, col)| Column::new(col.name.as_str().into(), table.column(r).to_vec()))
        .collect::<Vec<_>>();
    Ok(DataFrame::new(columns)?)
}

/// `df` with every replicate column appended.
pub fn with_replicates(df: &DataFrame, table: &ReplicateWeightTable) -> Result<DataFrame> {
    let reps = replicate_frame(table)?;
    Ok(df.hstack(reps.get_columns())?)
}

// ============================================================================
// Estimates
// ============================================================================

/// One row per estimate.
pub fn estimates_frame(estimates: &[Estimate]) -> Result<DataFrame> {
    let df = df![
        "label" => estimates.iter().map(|e| e.label.clone()).collect::<Vec<_>>(),
        "domain" => estimates.iter().map(|e| e.domain.clone()).collect::<Vec<_>>(),
        "est" => estimates.iter().map(|e| e.point).collect::<Vec<_>>(),
        "se" => estimates.iter().map(|e| e.std_error).collect::<Vec<_>>(),
        "var" => estimates.iter().map(|e| e.variance).collect::<Vec<_>>(),
        "lci" => estimates.iter().map(|e| e.ci_low).collect::<Vec<_>>(),
        "uci" => estimates.iter().map(|e| e.ci_high).collect::<Vec<_>>(),
        "df" => estimates.iter().map(|e| e.dof as u32).collect::<Vec<_>>(),
        "n" => estimates.iter().map(|e| e.n as u32).collect::<Vec<_>>(),
        "cv" => estimates.iter().map(|e| e.cv).collect::<Vec<_>>(),
        "deff" => estimates.iter().map(|e| e.deff).collect::<Vec<_>>(),
        "method" => estimates.iter().map(|e| e.method.as_str()).collect::<Vec<_>>(),
        "undefined_reps" => estimates.iter().map(|e| e.undefined_replicates as u32).collect::<Vec<_>>(),
    ]?;
    Ok(df)
}
