use crate::errors::{ALError, Result};
use crate::library::{in_unit_cube, Fidelity, ProbabilityFunction, Sample, SamplingFunction};

/// Data needed to define a bi-fidelity problem: the two sampling functions and their costs.
pub struct BiFidelityDataset {
    sample_lf: Box<dyn SamplingFunction>,
    sample_hf: Box<dyn SamplingFunction>,
    true_p_lf: Option<Box<dyn ProbabilityFunction>>,
    true_p_hf: Option<Box<dyn ProbabilityFunction>>,
    name: String,
    c_lf: f64,
    c_hf: f64,
}

impl BiFidelityDataset {
    pub fn new(
        name: impl Into<String>,
        sample_lf: impl SamplingFunction + 'static,
        sample_hf: impl SamplingFunction + 'static,
        c_lf: f64,
        c_hf: f64,
    ) -> Result<Self> {
        for (label, cost) in [("c_LF", c_lf), ("c_HF", c_hf)] {
            if !cost.is_finite() || cost <= 0. {
                return Err(ALError::config(
                    "BiFidelityDataset",
                    format!("{} must be a positive finite cost, got {}", label, cost),
                ));
            }
        }
        Ok(Self {
            sample_lf: Box::new(sample_lf),
            sample_hf: Box::new(sample_hf),
            true_p_lf: None,
            true_p_hf: None,
            name: name.into(),
            c_lf,
            c_hf,
        })
    }

    pub fn with_true_probabilities(
        mut self,
        true_p_lf: impl ProbabilityFunction + 'static,
        true_p_hf: impl ProbabilityFunction + 'static,
    ) -> Self {
        self.true_p_lf = Some(Box::new(true_p_lf));
        self.true_p_hf = Some(Box::new(true_p_hf));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn c_lf(&self) -> f64 {
        self.c_lf
    }

    pub fn c_hf(&self) -> f64 {
        self.c_hf
    }

    pub fn cost(&self, fidelity: Fidelity) -> f64 {
        match fidelity {
            Fidelity::Low => self.c_lf,
            Fidelity::High => self.c_hf,
        }
    }

    pub fn cheapest_cost(&self) -> f64 {
        self.c_lf.min(self.c_hf)
    }

    /// Queries one fidelity. Points outside the unit cube are rejected, never clamped.
    ///
    /// Cost is not charged here; the caller owns the budget.
    pub fn sample(&self, fidelity: Fidelity, x: &[Vec<f64>], reps: usize) -> Result<Sample> {
        if let Some(point) = x.iter().find(|p| !in_unit_cube(p)) {
            return Err(ALError::OutOfDomain {
                component: format!("dataset {}", self.name),
                point: point.clone(),
            });
        }
        let sample = match fidelity {
            Fidelity::Low => self.sample_lf.sample(x, reps),
            Fidelity::High => self.sample_hf.sample(x, reps),
        };
        if sample.y.len() != x.len() {
            return Err(ALError::Dataset {
                name: self.name.clone(),
                message: format!(
                    "{} sampler returned {} outcomes for {} points",
                    fidelity,
                    sample.y.len(),
                    x.len()
                ),
            });
        }
        Ok(sample)
    }

    pub fn true_probability(&self, fidelity: Fidelity, x: &[Vec<f64>]) -> Option<Vec<f64>> {
        let function = match fidelity {
            Fidelity::Low => self.true_p_lf.as_ref(),
            Fidelity::High => self.true_p_hf.as_ref(),
        };
        function.map(|f| f.probability(x))
    }
}

impl std::fmt::Debug for BiFidelityDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiFidelityDataset")
            .field("name", &self.name)
            .field("c_lf", &self.c_lf)
            .field("c_hf", &self.c_hf)
            .finish_non_exhaustive()
    }
}
