// src/design.rs
//
// Design metadata: sample units, the declared stage structure, and the
// resolved (immutable) stratum / cluster index every other component reads.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

use crate::error::{check_len, Result, SurveyError};

/// Label of the implicit stratum used when a design is not stratified.
pub const GLOBAL_STRATUM: &str = "__none__";

// ============================================================================
// Units
// ============================================================================

/// Response disposition of a sampled unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    #[default]
    Respondent,
    Nonrespondent,
    Ineligible,
    Unknown,
}

impl ResponseStatus {
    /// Numeric coding used by tabular inputs: 0=RR, 1=NR, 2=IN, 3=UK.
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(ResponseStatus::Respondent),
            1 => Ok(ResponseStatus::Nonrespondent),
            2 => Ok(ResponseStatus::Ineligible),
            3 => Ok(ResponseStatus::Unknown),
            other => Err(SurveyError::InvalidInput(format!("unknown response code {}", other))),
        }
    }
}

/// What happened to a unit at one sampling stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDraw {
    pub stratum: Option<String>,
    pub cluster: Option<String>,
    /// Selection probability at this stage, conditional on the previous stages.
    pub probability: f64,
}

/// One observed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleUnit {
    pub id: String,
    pub draws: Vec<StageDraw>,
    pub outcomes: Vec<f64>,
    pub auxiliaries: Vec<f64>,
    pub categories: Vec<String>,
    pub response: ResponseStatus,
}

impl SampleUnit {
    /// Single-stage unit.
    pub fn new(
        id: impl Into<String>,
        stratum: Option<&str>,
        cluster: Option<&str>,
        probability: f64,
    ) -> Self {
        SampleUnit {
            id: id.into(),
            draws: vec![StageDraw {
                stratum: stratum.map(str::to_string),
                cluster: cluster.map(str::to_string),
                probability,
            }],
            outcomes: Vec::new(),
            auxiliaries: Vec::new(),
            categories: Vec::new(),
            response: ResponseStatus::Respondent,
        }
    }

    /// Append the draw of a later stage.
    pub fn with_stage(mut self, stratum: Option<&str>, cluster: Option<&str>, probability: f64) -> Self {
        self.draws.push(StageDraw {
            stratum: stratum.map(str::to_string),
            cluster: cluster.map(str::to_string),
            probability,
        });
        self
    }

    pub fn with_outcomes(mut self, outcomes: Vec<f64>) -> Self {
        self.outcomes = outcomes;
        self
    }

    pub fn with_auxiliaries(mut self, auxiliaries: Vec<f64>) -> Self {
        self.auxiliaries = auxiliaries;
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_response(mut self, response: ResponseStatus) -> Self {
        self.response = response;
        self
    }

    /// First-stage stratum.
    pub fn stratum(&self) -> Option<&str> {
        self.draws.first().and_then(|d| d.stratum.as_deref())
    }

    /// First-stage cluster (PSU).
    pub fn cluster(&self) -> Option<&str> {
        self.draws.first().and_then(|d| d.cluster.as_deref())
    }

    /// Overall inclusion probability: product of the conditional stage probabilities.
    pub fn inclusion_probability(&self) -> f64 {
        self.draws.iter().map(|d| d.probability).product()
    }
}

// ============================================================================
// Stage structure
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageSpec {
    pub stratify_by: Option<String>,
    pub cluster_by: Option<String>,
    #[serde(default)]
    pub with_replacement: bool,
    /// Number of population clusters per stratum label, for the finite
    /// population correction of without-replacement stages.
    #[serde(default)]
    pub population_clusters: BTreeMap<String, f64>,
}

impl StageSpec {
    pub fn new(stratify_by: Option<&str>, cluster_by: Option<&str>) -> Self {
        StageSpec {
            stratify_by: stratify_by.map(str::to_string),
            cluster_by: cluster_by.map(str::to_string),
            with_replacement: false,
            population_clusters: BTreeMap::new(),
        }
    }

    pub fn with_replacement(mut self, with_replacement: bool) -> Self {
        self.with_replacement = with_replacement;
        self
    }

    pub fn with_population_clusters(mut self, counts: BTreeMap<String, f64>) -> Self {
        self.population_clusters = counts;
        self
    }
}

/// Ordered stage descriptors. The order is fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDesignSpec")]
pub struct DesignSpec {
    stages: Vec<StageSpec>,
}

#[derive(Deserialize)]
struct RawDesignSpec {
    stages: Vec<StageSpec>,
}

impl TryFrom<RawDesignSpec> for DesignSpec {
    type Error = SurveyError;

    fn try_from(raw: RawDesignSpec) -> Result<Self> {
        DesignSpec::new(raw.stages)
    }
}

impl DesignSpec {
    pub fn new(stages: Vec<StageSpec>) -> Result<Self> {
        if stages.is_empty() {
            return Err(SurveyError::DesignSpec("a design needs at least one stage".into()));
        }
        Ok(DesignSpec { stages })
    }

    pub fn single_stage(stage: StageSpec) -> Self {
        DesignSpec { stages: vec![stage] }
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn first_stage(&self) -> &StageSpec {
        &self.stages[0]
    }
}

// ============================================================================
// Sample: units plus resolved variable roles
// ============================================================================

/// The unit records together with the names of their outcome, auxiliary and
/// categorical variables. Names are resolved to positions once, here.
#[derive(Debug, Clone)]
pub struct Sample {
    units: Vec<SampleUnit>,
    outcome_names: Vec<String>,
    auxiliary_names: Vec<String>,
    category_names: Vec<String>,
    outcome_lookup: HashMap<String, usize>,
    auxiliary_lookup: HashMap<String, usize>,
    category_lookup: HashMap<String, usize>,
}

fn lookup(names: &[String], role: &str) -> Result<HashMap<String, usize>> {
    let mut map = HashMap::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        if map.insert(name.clone(), i).is_some() {
            return Err(SurveyError::InvalidInput(format!("duplicate {} variable '{}'", role, name)));
        }
    }
    Ok(map)
}

impl Sample {
    pub fn new(
        units: Vec<SampleUnit>,
        outcome_names: Vec<String>,
        auxiliary_names: Vec<String>,
        category_names: Vec<String>,
    ) -> Result<Self> {
        for unit in &units {
            check_len(outcome_names.len(), unit.outcomes.len())?;
            check_len(auxiliary_names.len(), unit.auxiliaries.len())?;
            check_len(category_names.len(), unit.categories.len())?;
        }
        Ok(Sample {
            outcome_lookup: lookup(&outcome_names, "outcome")?,
            auxiliary_lookup: lookup(&auxiliary_names, "auxiliary")?,
            category_lookup: lookup(&category_names, "category")?,
            units,
            outcome_names,
            auxiliary_names,
            category_names,
        })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[SampleUnit] {
        &self.units
    }

    pub fn outcome_names(&self) -> &[String] {
        &self.outcome_names
    }

    pub fn auxiliary_names(&self) -> &[String] {
        &self.auxiliary_names
    }

    pub fn category_names(&self) -> &[String] {
        &self.category_names
    }

    pub fn outcome_index(&self, name: &str) -> Result<usize> {
        self.outcome_lookup
            .get(name)
            .copied()
            .ok_or_else(|| SurveyError::MissingVariable(format!("outcome '{}'", name)))
    }

    pub fn auxiliary_index(&self, name: &str) -> Result<usize> {
        self.auxiliary_lookup
            .get(name)
            .copied()
            .ok_or_else(|| SurveyError::MissingVariable(format!("auxiliary '{}'", name)))
    }

    pub fn category_index(&self, name: &str) -> Result<usize> {
        self.category_lookup
            .get(name)
            .copied()
            .ok_or_else(|| SurveyError::MissingVariable(format!("category '{}'", name)))
    }

    /// Values of one outcome across units.
    pub fn outcome(&self, index: usize) -> Array1<f64> {
        Array1::from_iter(self.units.iter().map(|u| u.outcomes[index]))
    }

    /// Auxiliary matrix (n_units, columns.len()) for the given auxiliary positions.
    pub fn auxiliary_matrix(&self, columns: &[usize]) -> Array2<f64> {
        Array2::from_shape_fn((self.units.len(), columns.len()), |(i, j)| {
            self.units[i].auxiliaries[columns[j]]
        })
    }

    pub fn category(&self, index: usize) -> Vec<&str> {
        self.units.iter().map(|u| u.categories[index].as_str()).collect()
    }

    pub fn response(&self) -> Vec<ResponseStatus> {
        self.units.iter().map(|u| u.response).collect()
    }
}

// ============================================================================
// Resolved design
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Stratum {
    pub label: String,
    /// Global cluster indices, sorted by cluster label.
    pub clusters: Vec<usize>,
    /// Finite population correction `1 - n_h/N_h`, 1 when unknown or with replacement.
    pub fpc: f64,
}

impl Stratum {
    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_certainty(&self) -> bool {
        self.clusters.len() == 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub label: String,
    pub stratum: usize,
    pub units: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum ClusterKey {
    Named(String),
    SelfRepresenting(usize),
}

/// Frozen first-stage structure of a sample. Built once, read by every
/// weighting, replication and variance operation.
#[derive(Debug, Clone)]
pub struct Design {
    spec: DesignSpec,
    stratum_of: Vec<usize>,
    cluster_of: Vec<usize>,
    strata: Vec<Stratum>,
    clusters: Vec<Cluster>,
    stage_probabilities: Vec<Vec<f64>>,
}

impl Design {
    #[instrument(skip_all, fields(n_units = sample.len(), n_stages = spec.stages().len()))]
    pub fn new(sample: &Sample, spec: DesignSpec) -> Result<Self> {
        let units = sample.units();
        if units.is_empty() {
            return Err(SurveyError::DesignSpec("sample has no units".into()));
        }
        validate_units(units, &spec)?;

        // stratum label -> cluster key -> member units
        let mut layout: BTreeMap<String, BTreeMap<ClusterKey, Vec<usize>>> = BTreeMap::new();
        let mut home: HashMap<String, String> = HashMap::new();

        for (i, unit) in units.iter().enumerate() {
            let stratum = unit.stratum().unwrap_or(GLOBAL_STRATUM).to_string();
            let key = match unit.cluster() {
                Some(c) => {
                    if let Some(prev) = home.insert(c.to_string(), stratum.clone()) {
                        if prev != stratum {
                            return Err(SurveyError::DesignSpec(format!(
                                "cluster '{}' appears in strata '{}' and '{}'",
                                c, prev, stratum
                            )));
                        }
                    }
                    ClusterKey::Named(c.to_string())
                }
                None => ClusterKey::SelfRepresenting(i),
            };
            layout.entry(stratum).or_default().entry(key).or_default().push(i);
        }

        let first = spec.first_stage();
        let mut stratum_of = vec![0; units.len()];
        let mut cluster_of = vec![0; units.len()];
        let mut strata = Vec::with_capacity(layout.len());
        let mut clusters = Vec::new();

        for (h, (label, members)) in layout.into_iter().enumerate() {
            let n_h = members.len();
            let fpc = match first.population_clusters.get(&label) {
                Some(&big_n) if !first.with_replacement => {
                    if big_n < n_h as f64 {
                        return Err(SurveyError::DesignSpec(format!(
                            "stratum '{}' has {} sampled clusters but only {} in the population",
                            label, n_h, big_n
                        )));
                    }
                    1.0 - n_h as f64 / big_n
                }
                _ => 1.0,
            };

            let mut ids = Vec::with_capacity(n_h);
            for (key, unit_ids) in members {
                let c = clusters.len();
                let cluster_label = match key {
                    ClusterKey::Named(name) => name,
                    ClusterKey::SelfRepresenting(i) => units[i].id.clone(),
                };
                for &i in &unit_ids {
                    stratum_of[i] = h;
                    cluster_of[i] = c;
                }
                clusters.push(Cluster { label: cluster_label, stratum: h, units: unit_ids });
                ids.push(c);
            }
            strata.push(Stratum { label, clusters: ids, fpc });
        }

        let stage_probabilities = units
            .iter()
            .map(|u| u.draws.iter().map(|d| d.probability).collect())
            .collect();

        debug!(n_strata = strata.len(), n_clusters = clusters.len(), "design resolved");

        Ok(Design { spec, stratum_of, cluster_of, strata, clusters, stage_probabilities })
    }

    pub fn spec(&self) -> &DesignSpec {
        &self.spec
    }

    pub fn n_units(&self) -> usize {
        self.stratum_of.len()
    }

    pub fn stratum_of(&self, unit: usize) -> usize {
        self.stratum_of[unit]
    }

    pub fn cluster_of(&self, unit: usize) -> usize {
        self.cluster_of[unit]
    }

    pub fn stratum_indices(&self) -> &[usize] {
        &self.stratum_of
    }

    pub fn cluster_indices(&self) -> &[usize] {
        &self.cluster_of
    }

    pub fn strata(&self) -> &[Stratum] {
        &self.strata
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn n_clusters(&self, stratum: usize) -> usize {
        self.strata[stratum].clusters.len()
    }

    pub fn fpc(&self, stratum: usize) -> f64 {
        self.strata[stratum].fpc
    }

    pub fn stage_probabilities(&self, unit: usize) -> &[f64] {
        &self.stage_probabilities[unit]
    }

    /// `Σ_h (n_h - 1)`.
    pub fn degrees_of_freedom(&self) -> usize {
        self.strata.iter().map(|s| s.clusters.len().saturating_sub(1)).sum()
    }

    /// Strata holding a single cluster.
    pub fn certainty_strata(&self) -> Vec<usize> {
        self.strata
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_certainty())
            .map(|(h, _)| h)
            .collect()
    }
}

fn validate_units(units: &[SampleUnit], spec: &DesignSpec) -> Result<()> {
    let n_stages = spec.stages().len();
    if n_stages == 0 {
        return Err(SurveyError::DesignSpec("a design needs at least one stage".into()));
    }
    let mut seen_ids: HashMap<&str, usize> = HashMap::with_capacity(units.len());
    // per stage: cluster label -> parent cluster label of the previous stage
    let mut parents: Vec<HashMap<&str, Option<&str>>> = vec![HashMap::new(); n_stages];

    for (i, unit) in units.iter().enumerate() {
        if let Some(prev) = seen_ids.insert(unit.id.as_str(), i) {
            return Err(SurveyError::DesignSpec(format!(
                "duplicate unit id '{}' (rows {} and {})",
                unit.id, prev, i
            )));
        }
        if unit.draws.len() != n_stages {
            return Err(SurveyError::DesignSpec(format!(
                "unit '{}' has {} stage draws, design declares {}",
                unit.id,
                unit.draws.len(),
                n_stages
            )));
        }
        for (k, (draw, stage)) in unit.draws.iter().zip(spec.stages()).enumerate() {
            if !(draw.probability > 0.0 && draw.probability <= 1.0) {
                return Err(SurveyError::DesignSpec(format!(
                    "unit '{}' stage {}: selection probability {} outside (0, 1]",
                    unit.id,
                    k + 1,
                    draw.probability
                )));
            }
            match (&stage.stratify_by, &draw.stratum) {
                (None, Some(s)) => {
                    return Err(SurveyError::DesignSpec(format!(
                        "unit '{}' stage {}: stratum '{}' given for an unstratified stage",
                        unit.id,
                        k + 1,
                        s
                    )))
                }
                (Some(var), None) => {
                    return Err(SurveyError::DesignSpec(format!(
                        "unit '{}' stage {}: missing stratum ({})",
                        unit.id,
                        k + 1,
                        var
                    )))
                }
                _ => {}
            }
            if stage.cluster_by.is_none() && draw.cluster.is_some() {
                return Err(SurveyError::DesignSpec(format!(
                    "unit '{}' stage {}: cluster given for an unclustered stage",
                    unit.id,
                    k + 1
                )));
            }
            // a later-stage cluster must nest inside exactly one earlier-stage cluster
            if let (Some(c), true) = (draw.cluster.as_deref(), k > 0) {
                let parent = unit.draws[k - 1].cluster.as_deref();
                if let Some(prev) = parents[k].insert(c, parent) {
                    if prev != parent {
                        return Err(SurveyError::DesignSpec(format!(
                            "stage {} cluster '{}' is nested in more than one stage {} cluster",
                            k + 1,
                            c,
                            k
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}
