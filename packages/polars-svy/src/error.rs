// src/error.rs

use polars::prelude::PolarsError;
use svy_engine::SurveyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Survey(#[from] SurveyError),

    #[error("column '{column}' has a null at row {row}")]
    Null { column: String, row: usize },

    #[error("column roles: {0}")]
    Roles(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
