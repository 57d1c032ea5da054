// src/weighting/mod.rs

pub mod calibration;
pub mod design_weights;
pub mod diagnostics;
pub mod hadamard;
pub mod nonresponse;
pub mod normalization;
pub mod poststratification;
pub mod raking;
pub mod replication;
pub mod trimming;
pub mod utils;
pub mod weight;

pub use calibration::{calibrate, calibrate_by_cells, calibrate_linear, calibrate_replicates, CalibrationTarget};
pub use design_weights::build_design_weights;
pub use diagnostics::{CalibrationKind, CalibrationWarning, ConvergenceReport};
pub use nonresponse::apply_adjustment;
pub use normalization::normalize;
pub use poststratification::{poststratify, poststratify_shares};
pub use raking::{rake, Margin, RakingOutcome};
pub use replication::{
    make_replicates, ExcludedStratum, ExclusionReason, ReplicateColumn, ReplicatePlan, ReplicateWeightTable,
    ReplicationDiagnostics,
};
pub use trimming::trim;
pub use utils::ClassMap;
pub use weight::{AdjustmentRecord, AdjustmentStep, Weight};
