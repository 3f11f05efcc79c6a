use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Fidelity {
    Low,
    High,
}

impl Fidelity {
    pub fn label(&self) -> &'static str {
        match self {
            Fidelity::Low => "LF",
            Fidelity::High => "HF",
        }
    }
}

impl fmt::Display for Fidelity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Bounds of a single input dimension in physical (un-normalized) units.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Domain {
    pub min: f64,
    pub max: f64,
}

impl Domain {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn size(&self) -> f64 {
        self.max - self.min
    }

    pub fn normalize(&self, value: f64) -> f64 {
        (value - self.min) / self.size()
    }

    pub fn denormalize(&self, value: f64) -> f64 {
        self.min + value * self.size()
    }
}

impl From<(f64, f64)> for Domain {
    fn from((min, max): (f64, f64)) -> Self {
        Self { min, max }
    }
}

/// Maps a normalized point back into the physical domain.
pub fn denormalize_point(point: &[f64], domains: &[Domain]) -> Vec<f64> {
    point
        .iter()
        .zip(domains.iter())
        .map(|(value, domain)| domain.denormalize(*value))
        .collect()
}

pub fn normalize_point(point: &[f64], domains: &[Domain]) -> Vec<f64> {
    point
        .iter()
        .zip(domains.iter())
        .map(|(value, domain)| domain.normalize(*value))
        .collect()
}

#[inline]
pub fn in_unit_cube(point: &[f64]) -> bool {
    point.iter().all(|v| (0.0..=1.0).contains(v))
}

pub(crate) fn random_unit_point(dims: usize, rng: &mut impl Rng) -> Vec<f64> {
    (0..dims).map(|_| rng.gen_range(0.0..=1.0)).collect()
}

pub(crate) fn random_unit_points(n: usize, dims: usize, rng: &mut impl Rng) -> Vec<Vec<f64>> {
    (0..n).map(|_| random_unit_point(dims, rng)).collect()
}

/// Outcome of one call to a sampling function.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// One outcome per queried point, averaged over repeats.
    pub y: Vec<f64>,
    pub probs: Option<Vec<f64>>,
}

impl Sample {
    pub fn new(y: Vec<f64>) -> Self {
        Self { y, probs: None }
    }

    pub fn with_probs(mut self, probs: Vec<f64>) -> Self {
        self.probs = Some(probs);
        self
    }

    /// Averages a `reps x N` matrix of repeated outcomes into one value per point.
    pub fn from_repeats(repeats: &[Vec<f64>]) -> Self {
        let n = repeats.first().map(Vec::len).unwrap_or(0);
        let reps = repeats.len().max(1) as f64;
        let y = (0..n)
            .map(|i| repeats.iter().map(|row| row[i]).sum::<f64>() / reps)
            .collect();
        Self { y, probs: None }
    }
}

/// A source of observations at one fidelity.
///
/// Points are given in normalized coordinates; `reps` is the number of repeated
/// evaluations to average per point.
pub trait SamplingFunction {
    fn sample(&self, x: &[Vec<f64>], reps: usize) -> Sample;
}

impl<T> SamplingFunction for T
where
    T: Fn(&[Vec<f64>], usize) -> Sample,
{
    fn sample(&self, x: &[Vec<f64>], reps: usize) -> Sample {
        self(x, reps)
    }
}

/// Ground truth success probability, used for evaluation only.
pub trait ProbabilityFunction {
    fn probability(&self, x: &[Vec<f64>]) -> Vec<f64>;
}

impl<T> ProbabilityFunction for T
where
    T: Fn(&[Vec<f64>]) -> Vec<f64>,
{
    fn probability(&self, x: &[Vec<f64>]) -> Vec<f64> {
        self(x)
    }
}

/// Everything acquired so far. Append-only; always the full retraining set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingData {
    pub x_lf: Vec<Vec<f64>>,
    pub y_lf: Vec<f64>,
    pub x_hf: Vec<Vec<f64>>,
    pub y_hf: Vec<f64>,
}

impl TrainingData {
    pub fn push(&mut self, fidelity: Fidelity, x: Vec<f64>, y: f64) {
        match fidelity {
            Fidelity::Low => {
                self.x_lf.push(x);
                self.y_lf.push(y);
            }
            Fidelity::High => {
                self.x_hf.push(x);
                self.y_hf.push(y);
            }
        }
    }

    pub fn extend(&mut self, fidelity: Fidelity, x: Vec<Vec<f64>>, y: Vec<f64>) {
        for (x, y) in x.into_iter().zip(y) {
            self.push(fidelity, x, y);
        }
    }

    pub fn len(&self, fidelity: Fidelity) -> usize {
        match fidelity {
            Fidelity::Low => self.x_lf.len(),
            Fidelity::High => self.x_hf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x_lf.is_empty() && self.x_hf.is_empty()
    }
}

/// One entry of a selected batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub point: Vec<f64>,
    pub fidelity: Fidelity,
    /// Index of the base candidate in the pool it was drawn from.
    pub pool_index: usize,
    /// 0 for the first pick of a candidate, n for its n-th repeat.
    pub repeat: usize,
    pub utility: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_round_trips_through_bounds() {
        let domains = vec![Domain::new(-2.0, 2.0), Domain::new(10.0, 20.0)];
        let physical = denormalize_point(&[0.25, 0.5], &domains);
        assert_eq!(physical, vec![-1.0, 15.0]);
        assert_eq!(normalize_point(&physical, &domains), vec![0.25, 0.5]);
    }

    #[test]
    fn unit_cube_membership() {
        assert!(in_unit_cube(&[0.0, 1.0, 0.5]));
        assert!(!in_unit_cube(&[0.0, 1.0001]));
        assert!(!in_unit_cube(&[-1e-9]));
    }

    #[test]
    fn repeats_are_averaged_per_point() {
        let sample = Sample::from_repeats(&[vec![1.0, 0.0, 1.0], vec![0.0, 0.0, 1.0]]);
        assert_eq!(sample.y, vec![0.5, 0.0, 1.0]);
        assert!(sample.probs.is_none());
    }

    #[test]
    fn training_data_appends_per_fidelity() {
        let mut data = TrainingData::default();
        data.push(Fidelity::Low, vec![0.1], 1.0);
        data.extend(Fidelity::High, vec![vec![0.2], vec![0.3]], vec![0.0, 1.0]);
        assert_eq!(data.len(Fidelity::Low), 1);
        assert_eq!(data.len(Fidelity::High), 2);
        assert_eq!(data.y_hf, vec![0.0, 1.0]);
    }
}
