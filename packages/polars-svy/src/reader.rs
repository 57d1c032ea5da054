// src/reader.rs

use polars::prelude::*;
use svy_engine::{DesignSpec, ResponseStatus, Sample, SampleUnit};
use tracing::{debug, instrument};

use crate::error::{FrameError, Result};
use crate::roles::ColumnRoles;

fn strings(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let col = df.column(name)?.cast(&DataType::String)?;
    col.str()?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.map(str::to_string)
                .ok_or_else(|| FrameError::Null { column: name.to_string(), row })
        })
        .collect()
}

fn floats(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let col = df.column(name)?.cast(&DataType::Float64)?;
    col.f64()?
        .into_iter()
        .enumerate()
        .map(|(row, v)| v.ok_or_else(|| FrameError::Null { column: name.to_string(), row }))
        .collect()
}

fn responses(df: &DataFrame, name: &str) -> Result<Vec<ResponseStatus>> {
    let col = df.column(name)?.cast(&DataType::Int64)?;
    col.i64()?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            let code = v.ok_or_else(|| FrameError::Null { column: name.to_string(), row })?;
            Ok(ResponseStatus::from_code(code)?)
        })
        .collect()
}

/// Optional per-stage string column, read once.
fn stage_labels(df: &DataFrame, name: Option<&str>) -> Result<Option<Vec<String>>> {
    name.map(|n| strings(df, n)).transpose()
}

/// Column-major values transposed to one row per unit.
fn rows<T: Clone>(columns: &[Vec<T>], n: usize) -> Vec<Vec<T>> {
    (0..n).map(|i| columns.iter().map(|c| c[i].clone()).collect()).collect()
}

/// Build a [`Sample`] from a frame. Every column is resolved and converted
/// once; nulls in any role column are an error.
#[instrument(skip_all, fields(n_rows = df.height(), n_stages = spec.stages().len()))]
pub fn read_sample(df: &DataFrame, roles: &ColumnRoles, spec: &DesignSpec) -> Result<Sample> {
    roles.validate(spec)?;
    let n = df.height();

    let ids = match &roles.id {
        Some(col) => strings(df, col)?,
        None => (0..n).map(|i| i.to_string()).collect(),
    };

    let mut stages = Vec::with_capacity(spec.stages().len());
    for (stage, prob_col) in spec.stages().iter().zip(&roles.probabilities) {
        let strata = stage_labels(df, stage.stratify_by.as_deref())?;
        let clusters = stage_labels(df, stage.cluster_by.as_deref())?;
        stages.push((strata, clusters, floats(df, prob_col)?));
    }

    let outcomes = roles.outcomes.iter().map(|c| floats(df, c)).collect::<Result<Vec<_>>>()?;
    let auxiliaries = roles.auxiliaries.iter().map(|c| floats(df, c)).collect::<Result<Vec<_>>>()?;
    let categories = roles.categories.iter().map(|c| strings(df, c)).collect::<Result<Vec<_>>>()?;
    let response = roles.response.as_deref().map(|c| responses(df, c)).transpose()?;

    let mut outcome_rows = rows(&outcomes, n).into_iter();
    let mut auxiliary_rows = rows(&auxiliaries, n).into_iter();
    let mut category_rows = rows(&categories, n).into_iter();

    let mut units = Vec::with_capacity(n);
    for (i, id) in ids.into_iter().enumerate() {
        let label = |labels: &Option<Vec<String>>| labels.as_ref().map(|v| v[i].clone());
        let mut draws = stages.iter().map(|(s, c, p)| (label(s), label(c), p[i]));

        let Some((stratum, cluster, p)) = draws.next() else {
            return Err(FrameError::Roles("design has no stage".into()));
        };
        let mut unit = SampleUnit::new(id, stratum.as_deref(), cluster.as_deref(), p);
        for (stratum, cluster, p) in draws {
            unit = unit.with_stage(stratum.as_deref(), cluster.as_deref(), p);
        }

        unit = unit
            .with_outcomes(outcome_rows.next().unwrap_or_default())
            .with_auxiliaries(auxiliary_rows.next().unwrap_or_default())
            .with_categories(category_rows.next().unwrap_or_default());
        if let Some(r) = &response {
            unit = unit.with_response(r[i]);
        }
        units.push(unit);
    }

    debug!(n_units = units.len(), "sample read");
    Ok(Sample::new(
        units,
        roles.outcomes.clone(),
        roles.auxiliaries.clone(),
        roles.categories.clone(),
    )?)
}
