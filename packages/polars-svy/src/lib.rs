// src/lib.rs
//! Polars boundary of `svy-engine`: read a [`Sample`](svy_engine::Sample)
//! from a frame with explicit column roles, and write weights, replicate
//! weights and estimates back as columns and frames.

pub mod error;
pub mod reader;
pub mod roles;
pub mod writer;

pub use error::{FrameError, Result};
pub use reader::read_sample;
pub use roles::ColumnRoles;
pub use writer::{estimates_frame, replicate_frame, weight_column, with_replicates, with_weight};
