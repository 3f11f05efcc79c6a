use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{ALError, Result};
use crate::library::Domain;

/// Settings for initialising a bi-fidelity batch active learning experiment.
///
/// Build it through [`ConfigBuilder`], which validates it before handing it out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ALExperimentConfig {
    pub n_l_init: usize,
    pub n_h_init: usize,
    /// Cumulative spend targets, one per round.
    pub cost_constraints: Vec<f64>,
    pub n_cand_lf: usize,
    pub n_cand_hf: usize,
    pub domain_bounds: Vec<Domain>,
    pub n_test: usize,
    pub train_lr: f64,
    pub train_epochs: usize,
    pub random_seed: Option<u64>,
    pub n_reps: usize,
    pub model_args: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConfigWarning {
    NonMonotonicBudgets {
        index: usize,
        previous: f64,
        next: f64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::NonMonotonicBudgets {
                index,
                previous,
                next,
            } => write!(
                f,
                "cost_constraints are not monotonically increasing ({} at {} is followed by {}). \
                 Rounds whose budget is already spent will acquire nothing.",
                previous, index, next
            ),
        }
    }
}

impl ALExperimentConfig {
    pub fn dims(&self) -> usize {
        self.domain_bounds.len()
    }

    /// Checks the invariants of the configuration.
    ///
    /// Hard violations are returned as errors. Suspicious but valid settings come back as
    /// warnings; at most one warning is produced for non-monotonic budgets.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>> {
        let fail = |message: String| Err(ALError::config("ALExperimentConfig", message));

        if self.cost_constraints.is_empty() {
            return fail("cost_constraints list cannot be empty".to_string());
        }
        if let Some(bad) = self
            .cost_constraints
            .iter()
            .find(|c| !c.is_finite() || **c < 0.)
        {
            return fail(format!(
                "cost constraint {} is not a non-negative number",
                bad
            ));
        }
        if self.domain_bounds.is_empty() {
            return fail("domain_bounds needs at least one dimension".to_string());
        }
        if let Some((index, domain)) = self
            .domain_bounds
            .iter()
            .enumerate()
            .find(|(_, d)| !(d.min < d.max))
        {
            return fail(format!(
                "domain bound {} has min {} >= max {}",
                index, domain.min, domain.max
            ));
        }
        if !(self.train_lr > 0.) {
            return fail(format!("train_lr must be positive, got {}", self.train_lr));
        }
        if self.n_reps == 0 {
            return fail("n_reps must be at least 1".to_string());
        }
        if self.n_cand_lf + self.n_cand_hf == 0 {
            return fail("the candidate pool is empty at both fidelities".to_string());
        }

        let warnings = self
            .cost_constraints
            .windows(2)
            .enumerate()
            .find(|(_, w)| w[0] > w[1])
            .map(|(index, w)| ConfigWarning::NonMonotonicBudgets {
                index,
                previous: w[0],
                next: w[1],
            })
            .into_iter()
            .collect();
        Ok(warnings)
    }
}

pub struct ConfigBuilder {
    n_l_init: usize,
    n_h_init: usize,
    cost_constraints: Vec<f64>,
    n_cand_lf: usize,
    n_cand_hf: usize,
    domain_bounds: Vec<Domain>,
    n_test: usize,
    train_lr: f64,
    train_epochs: usize,
    random_seed: Option<u64>,
    n_reps: usize,
    model_args: BTreeMap<String, serde_json::Value>,
}

impl ConfigBuilder {
    pub fn new(n_l_init: usize, n_h_init: usize, cost_constraints: Vec<f64>) -> Self {
        ConfigBuilder {
            n_l_init,
            n_h_init,
            cost_constraints,
            n_cand_lf: 2000,
            n_cand_hf: 1000,
            domain_bounds: vec![Domain::new(0., 1.), Domain::new(0., 1.)],
            n_test: 1000,
            train_lr: 0.01,
            train_epochs: 500,
            random_seed: None,
            n_reps: 5,
            model_args: BTreeMap::new(),
        }
    }

    pub fn candidates(mut self, n_cand_lf: usize, n_cand_hf: usize) -> Self {
        self.n_cand_lf = n_cand_lf;
        self.n_cand_hf = n_cand_hf;
        self
    }

    pub fn domain_bounds(mut self, bounds: impl IntoIterator<Item = (f64, f64)>) -> Self {
        self.domain_bounds = bounds.into_iter().map(Domain::from).collect();
        self
    }

    pub fn n_test(mut self, n_test: usize) -> Self {
        self.n_test = n_test;
        self
    }

    pub fn train_lr(mut self, lr: f64) -> Self {
        self.train_lr = lr;
        self
    }

    pub fn train_epochs(mut self, epochs: usize) -> Self {
        self.train_epochs = epochs;
        self
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn n_reps(mut self, n_reps: usize) -> Self {
        self.n_reps = n_reps;
        self
    }

    pub fn model_arg(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.model_args.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<ALExperimentConfig> {
        let config = ALExperimentConfig {
            n_l_init: self.n_l_init,
            n_h_init: self.n_h_init,
            cost_constraints: self.cost_constraints,
            n_cand_lf: self.n_cand_lf,
            n_cand_hf: self.n_cand_hf,
            domain_bounds: self.domain_bounds,
            n_test: self.n_test,
            train_lr: self.train_lr,
            train_epochs: self.train_epochs,
            random_seed: self.random_seed,
            n_reps: self.n_reps,
            model_args: self.model_args,
        };
        for warning in config.validate()? {
            log::warn!("{}", warning);
        }
        Ok(config)
    }
}
