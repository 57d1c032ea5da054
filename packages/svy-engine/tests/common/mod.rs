// tests/common/mod.rs
//! Shared sample builders for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};

use svy_engine::design::GLOBAL_STRATUM;
use svy_engine::{build_design_weights, Design, DesignSpec, Sample, SampleUnit, StageSpec, Weight};

/// Stratified cluster sample: `layout` lists, per stratum, the outcome
/// values of every unit of every cluster. All units share `probability`.
///
/// Outcomes are `y` and `one` (constant 1), and each unit carries its
/// stratum label as category `stratum`.
pub fn clustered(layout: &[(&str, Vec<Vec<f64>>)], probability: f64) -> (Sample, Design, Weight) {
    let mut units = Vec::new();
    for (stratum, clusters) in layout {
        for (c, values) in clusters.iter().enumerate() {
            let cluster = format!("{}-c{}", stratum, c + 1);
            for (u, &y) in values.iter().enumerate() {
                units.push(
                    SampleUnit::new(format!("{}-{}", cluster, u + 1), Some(*stratum), Some(cluster.as_str()), probability)
                        .with_outcomes(vec![y, 1.0])
                        .with_categories(vec![stratum.to_string()]),
                );
            }
        }
    }
    let sample = Sample::new(units, vec!["y".into(), "one".into()], vec![], vec!["stratum".into()]).unwrap();
    let design = Design::new(&sample, DesignSpec::single_stage(StageSpec::new(Some("stratum"), Some("psu")))).unwrap();
    let weight = build_design_weights(&sample, &design).unwrap();
    (sample, design, weight)
}

/// Simple random sample of `values` from a population of `population` units.
pub fn srs(values: &[f64], population: f64) -> (Sample, Design, Weight) {
    let p = values.len() as f64 / population;
    let units = values
        .iter()
        .enumerate()
        .map(|(i, &y)| SampleUnit::new(format!("u{}", i + 1), None, None, p).with_outcomes(vec![y]))
        .collect();
    let sample = Sample::new(units, vec!["y".into()], vec![], vec![]).unwrap();

    let mut counts = BTreeMap::new();
    counts.insert(GLOBAL_STRATUM.to_string(), population);
    let spec = DesignSpec::single_stage(StageSpec::default().with_population_clusters(counts));
    let design = Design::new(&sample, spec).unwrap();
    let weight = build_design_weights(&sample, &design).unwrap();
    (sample, design, weight)
}

/// `m` single-unit clusters per stratum in two strata, outcomes alternating
/// around 10 (spread 2) and 20 (spread 3).
pub fn alternating(m: usize) -> (Sample, Design, Weight) {
    let spread = |centre: f64, d: f64| -> Vec<Vec<f64>> {
        (0..m)
            .map(|c| vec![if c % 2 == 0 { centre - d } else { centre + d }])
            .collect()
    };
    clustered(&[("A", spread(10.0, 2.0)), ("B", spread(20.0, 3.0))], 0.1)
}

pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
}

/// In-memory sink for formatted log lines.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` under a WARN-level subscriber on the current thread and return
/// its result with everything it logged.
pub fn capture_warnings<T>(f: impl FnOnce() -> T) -> (T, String) {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, capture.contents())
}
