// src/lib.rs
//! Weighting and design-based variance estimation for complex surveys.
//!
//! The flow is: resolve a [`Design`] from a [`Sample`] and its
//! [`DesignSpec`], build design weights, adjust them (nonresponse,
//! trimming, post-stratification, GREG or raking calibration), generate a
//! [`ReplicateWeightTable`] if needed, and estimate with
//! [`VarianceEstimator`] using Taylor linearization or replication.

pub mod config;
pub mod design;
pub mod error;
pub mod estimation;
pub mod weighting;

pub use config::{
    CalibrationMethod, CiMethod, CollapseRule, FactorBounds, ReplicationMethod, SingletonMethod, TrimBounds,
    VarianceCenter, VarianceConfig,
};
pub use design::{Design, DesignSpec, ResponseStatus, Sample, SampleUnit, StageSpec};
pub use error::{Result, SurveyError};
pub use estimation::{
    DomainMask, Estimate, Parameter, QuantileMethod, VarianceEstimator, VarianceMethod, VarianceStrategy,
};
pub use weighting::{
    build_design_weights, calibrate, make_replicates, CalibrationTarget, ConvergenceReport, ReplicateWeightTable,
    Weight,
};
