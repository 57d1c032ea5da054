// src/roles.rs
//! Which frame column plays which role. Stratum and cluster columns are the
//! `stratify_by` / `cluster_by` names of the [`DesignSpec`] stages; every
//! other role is named here.

use serde::{Deserialize, Serialize};
use svy_engine::DesignSpec;

use crate::error::{FrameError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnRoles {
    /// Unit identifier; row positions are used when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Selection probability column of each stage, in stage order.
    pub probabilities: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub auxiliaries: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Integer response codes (0=RR, 1=NR, 2=IN, 3=UK).
    #[serde(default)]
    pub response: Option<String>,
}

impl ColumnRoles {
    pub fn new(probabilities: &[&str]) -> Self {
        ColumnRoles {
            probabilities: probabilities.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, column: &str) -> Self {
        self.id = Some(column.to_string());
        self
    }

    pub fn with_outcomes(mut self, columns: &[&str]) -> Self {
        self.outcomes = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_auxiliaries(mut self, columns: &[&str]) -> Self {
        self.auxiliaries = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_categories(mut self, columns: &[&str]) -> Self {
        self.categories = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_response(mut self, column: &str) -> Self {
        self.response = Some(column.to_string());
        self
    }

    /// One probability column per design stage.
    pub fn validate(&self, spec: &DesignSpec) -> Result<()> {
        let stages = spec.stages().len();
        if self.probabilities.len() != stages {
            return Err(FrameError::Roles(format!(
                "{} probability columns for a {}-stage design",
                self.probabilities.len(),
                stages
            )));
        }
        Ok(())
    }
}
