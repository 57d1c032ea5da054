// src/weighting/nonresponse.rs

use ndarray::{Array1, ArrayView1};
use tracing::{debug, instrument};

use super::utils::ClassMap;
use super::weight::{AdjustmentStep, Weight};
use crate::design::ResponseStatus;
use crate::error::{check_len, Result, SurveyError};

/// Weight totals of one adjustment cell, by response status.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CellSums {
    respondent: f64,
    nonrespondent: f64,
    ineligible: f64,
    unknown: f64,
}

/// Per-status multipliers of one cell. Nonrespondents and unknowns always
/// end at zero.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CellFactors {
    respondent: f64,
    ineligible: f64,
}

fn cell_factors(sums: &CellSums, unknown_to_ineligible: bool, cell: &str) -> Result<CellFactors> {
    let CellSums { respondent, nonrespondent, ineligible, unknown } = *sums;

    let to_respondents = if unknown_to_ineligible { nonrespondent } else { nonrespondent + unknown };
    if to_respondents > 0.0 && respondent <= 0.0 {
        return Err(SurveyError::degenerate(
            cell,
            format!("{} of nonrespondent weight but no respondent weight", to_respondents),
        ));
    }
    let adj_rr = if respondent > 0.0 { (respondent + to_respondents) / respondent } else { 1.0 };

    if !unknown_to_ineligible {
        return Ok(CellFactors { respondent: adj_rr, ineligible: 1.0 });
    }

    // Unknowns are spread over every unit of known status.
    let known = respondent + nonrespondent + ineligible;
    if unknown > 0.0 && known <= 0.0 {
        return Err(SurveyError::degenerate(cell, "unknown-status weight but no unit of known status"));
    }
    let adj_uk = if known > 0.0 { (known + unknown) / known } else { 1.0 };

    Ok(CellFactors { respondent: adj_rr * adj_uk, ineligible: adj_uk })
}

/// Nonresponse factors for one weight vector.
///
/// Within each cell, respondents absorb the weight of nonrespondents (and of
/// unknowns unless `unknown_to_ineligible`), ineligibles keep theirs, and
/// nonrespondents/unknowns drop to zero. With `unknown_to_ineligible` the
/// unknown weight is first spread over all units of known status.
pub fn nonresponse_factors(
    weights: ArrayView1<f64>,
    cells: &ClassMap,
    response: &[ResponseStatus],
    unknown_to_ineligible: bool,
) -> Result<Array1<f64>> {
    let n = weights.len();
    check_len(n, cells.len())?;
    check_len(n, response.len())?;

    let mut sums = vec![CellSums::default(); cells.n_classes()];
    for (i, &c) in cells.indices().iter().enumerate() {
        let w = weights[i];
        match response[i] {
            ResponseStatus::Respondent => sums[c].respondent += w,
            ResponseStatus::Nonrespondent => sums[c].nonrespondent += w,
            ResponseStatus::Ineligible => sums[c].ineligible += w,
            ResponseStatus::Unknown => sums[c].unknown += w,
        }
    }

    let factors = sums
        .iter()
        .enumerate()
        .map(|(c, s)| cell_factors(s, unknown_to_ineligible, cells.label(c)))
        .collect::<Result<Vec<_>>>()?;

    Ok(Array1::from_shape_fn(n, |i| {
        let f = factors[cells.indices()[i]];
        match response[i] {
            ResponseStatus::Respondent => f.respondent,
            ResponseStatus::Ineligible => f.ineligible,
            ResponseStatus::Nonrespondent | ResponseStatus::Unknown => 0.0,
        }
    }))
}

/// Nonresponse adjustment of a weight within adjustment cells.
#[instrument(skip_all, fields(n_cells = cells.n_classes(), unknown_to_ineligible = unknown_to_ineligible))]
pub fn apply_adjustment(
    weight: &Weight,
    cells: &ClassMap,
    response: &[ResponseStatus],
    unknown_to_ineligible: bool,
) -> Result<Weight> {
    let factors = nonresponse_factors(weight.values(), cells, response, unknown_to_ineligible)?;
    let adjusted = weight.adjust(AdjustmentStep::Nonresponse, factors)?;
    debug!(before = weight.total(), after = adjusted.total(), "nonresponse adjustment applied");
    Ok(adjusted)
}
