use std::{fs::File, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::library::{Domain, Fidelity, Selection};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentHistory {
    pub dataset: String,
    pub strategy: String,
    pub domains: Vec<Domain>,
    /// Cost of the initial design; not charged against any budget.
    pub initial_cost: f64,
    pub checkpoints: Vec<Checkpoint>,
}

/// State of the experiment after training on everything acquired up to one budget.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// 0 is the initial design; round `i` corresponds to `cost_constraints[i - 1]`.
    pub round: usize,
    pub cost_constraint: Option<f64>,
    pub cumulative_spend: f64,
    pub n_lf: usize,
    pub n_hf: usize,
    /// Expected log predictive probability on the held-out set; `None` when it is empty.
    pub elpp: Option<f64>,
    /// Mean absolute error of the predicted HF probability, when ground truth is known.
    pub prob_mae: Option<f64>,
    pub acquisitions: Vec<Acquisition>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Acquisition {
    pub batch: usize,
    pub fidelity: Fidelity,
    /// Normalized coordinates as queried.
    pub point: Vec<f64>,
    /// The same point in domain units.
    pub input: Vec<f64>,
    pub output: f64,
    pub utility: f64,
    pub cost: f64,
}

impl Acquisition {
    pub(crate) fn new(
        batch: usize,
        selection: &Selection,
        input: Vec<f64>,
        output: f64,
        cost: f64,
    ) -> Self {
        Self {
            batch,
            fidelity: selection.fidelity,
            point: selection.point.clone(),
            input,
            output,
            utility: selection.utility,
            cost,
        }
    }
}

impl ExperimentHistory {
    pub fn new(
        dataset: impl Into<String>,
        strategy: impl Into<String>,
        domains: Vec<Domain>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            strategy: strategy.into(),
            domains,
            initial_cost: 0.,
            checkpoints: Vec::new(),
        }
    }

    /// Cumulative spend recorded at each checkpoint.
    pub fn spend_trajectory(&self) -> Vec<f64> {
        self.checkpoints
            .iter()
            .map(|c| c.cumulative_spend)
            .collect()
    }

    pub fn last(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    pub fn acquisitions(&self) -> impl Iterator<Item = &Acquisition> {
        self.checkpoints.iter().flat_map(|c| c.acquisitions.iter())
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let writer = File::options()
            .write(true)
            .truncate(true)
            .create(true)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        serde_json::to_writer_pretty(writer, self)
            .with_context(|| format!("serializing history to {}", path.display()))?;
        Ok(())
    }

    pub fn read_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(serde_json::from_reader(file)?)
    }
}
