pub mod config;
pub mod dataset;
pub mod errors;
pub mod library;
pub mod math;
pub mod models;
pub mod output;
pub mod runner;
pub mod strategies;
#[cfg(test)]
pub(crate) mod testing;
pub use anyhow;

pub use config::{ALExperimentConfig, ConfigBuilder};
pub use dataset::BiFidelityDataset;
pub use errors::ALError;
pub use library::{Fidelity, Sample, Selection, TrainingData};
pub use models::{cokriging::CoKrigingModel, BiFidelityModel};
pub use runner::{ExperimentResult, ExperimentRunner};
pub use strategies::{AcquisitionStrategy, StrategyConfig};
