// src/estimation/mod.rs
pub mod domain;
pub mod estimator;
pub mod replication;
pub mod taylor;
pub mod variance;

pub use domain::DomainMask;
pub use estimator::{weighted_quantile, CustomEstimator, Parameter, QuantileMethod};
pub use replication::{replicate_estimates, replication_covariance};
pub use taylor::{srs_variance, taylor_covariance, taylor_variance};
pub use variance::{Estimate, VarianceEstimator, VarianceMethod, VarianceStrategy};
