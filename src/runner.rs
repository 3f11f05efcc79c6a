use std::path::PathBuf;

use rand::{rngs::StdRng, SeedableRng};

use crate::config::ALExperimentConfig;
use crate::dataset::BiFidelityDataset;
use crate::errors::{ALError, Result};
use crate::library::{denormalize_point, random_unit_points, Fidelity, TrainingData};
use crate::models::BiFidelityModel;
use crate::output::{Acquisition, Checkpoint, ExperimentHistory};
use crate::strategies::{validate_batch, AcquisitionStrategy, SelectionContext};

pub struct ExperimentResult<M> {
    pub model: M,
    pub data: TrainingData,
    pub history: ExperimentHistory,
}

/// Held-out high fidelity points used to evaluate the model at every checkpoint.
struct TestSet {
    x: Vec<Vec<f64>>,
    y: Vec<f64>,
    true_p: Option<Vec<f64>>,
}

/// Drives a bi-fidelity batch active learning experiment from the initial design to the
/// last cost constraint.
pub struct ExperimentRunner<M: BiFidelityModel> {
    dataset: BiFidelityDataset,
    strategy: Box<dyn AcquisitionStrategy>,
    config: ALExperimentConfig,
    model: M,
    output: Option<PathBuf>,
}

impl<M: BiFidelityModel> ExperimentRunner<M> {
    /// Fails with [`ALError::Config`] if `config` does not validate, however it was built.
    pub fn new(
        dataset: BiFidelityDataset,
        strategy: Box<dyn AcquisitionStrategy>,
        config: ALExperimentConfig,
        model: M,
    ) -> Result<Self> {
        for warning in config.validate()? {
            log::warn!("{}", warning);
        }
        Ok(Self {
            dataset,
            strategy,
            config,
            model,
            output: None,
        })
    }

    /// Write the history as JSON to `path` after every checkpoint.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn run_experiment(mut self) -> Result<ExperimentResult<M>> {
        let seed = self.config.random_seed.unwrap_or_else(rand::random);
        log::info!(
            "Starting {} on {} with seed {}",
            self.strategy.name(),
            self.dataset.name(),
            seed
        );
        let mut rng = StdRng::seed_from_u64(seed);
        let dims = self.config.dims();

        let mut data = TrainingData::default();
        let mut history = ExperimentHistory::new(
            self.dataset.name(),
            self.strategy.name(),
            self.config.domain_bounds.clone(),
        );
        for (fidelity, n) in [
            (Fidelity::Low, self.config.n_l_init),
            (Fidelity::High, self.config.n_h_init),
        ] {
            let x = random_unit_points(n, dims, &mut rng);
            if x.is_empty() {
                continue;
            }
            let sample = self.dataset.sample(fidelity, &x, self.config.n_reps)?;
            data.extend(fidelity, x, sample.y);
            history.initial_cost += self.dataset.cost(fidelity) * n as f64;
        }

        let test_x = random_unit_points(self.config.n_test, dims, &mut rng);
        let test_set = TestSet {
            y: if test_x.is_empty() {
                Vec::new()
            } else {
                self.dataset
                    .sample(Fidelity::High, &test_x, self.config.n_reps)?
                    .y
            },
            true_p: self.dataset.true_probability(Fidelity::High, &test_x),
            x: test_x,
        };

        self.train(&data)?;
        let checkpoint = self.checkpoint(0, None, 0., &data, &test_set, Vec::new());
        self.record(&mut history, checkpoint)?;

        let mut cumulative_spend = 0.;
        let cost_constraints = self.config.cost_constraints.clone();
        for (round, cost_budget) in cost_constraints.into_iter().enumerate() {
            let round = round + 1;
            log::info!(
                "Round {}: budget {} (spent {})",
                round,
                cost_budget,
                cumulative_spend
            );
            let mut acquisitions = Vec::new();
            let mut batch_number = 0;
            while cumulative_spend < cost_budget {
                let ctx = SelectionContext {
                    model: &self.model,
                    dataset: &self.dataset,
                    data: &data,
                    remaining_budget: cost_budget - cumulative_spend,
                    n_cand_lf: self.config.n_cand_lf,
                    n_cand_hf: self.config.n_cand_hf,
                    dims,
                };
                let batch = match self.strategy.select_batch(&ctx) {
                    Ok(batch) => batch,
                    Err(e) if e.is_budget_exhausted() => {
                        log::debug!("Round {} exhausted: {}", round, e);
                        break;
                    }
                    Err(e) => return Err(e),
                };
                if batch.is_empty() {
                    break;
                }
                validate_batch(self.strategy.name(), &batch)?;

                let mut accepted = 0;
                for selection in &batch {
                    let cost = self.dataset.cost(selection.fidelity);
                    if cumulative_spend + cost > cost_budget {
                        log::debug!(
                            "Skipping {} query at {:?}: would exceed budget {}",
                            selection.fidelity,
                            selection.point,
                            cost_budget
                        );
                        continue;
                    }
                    let sample = self.dataset.sample(
                        selection.fidelity,
                        std::slice::from_ref(&selection.point),
                        self.config.n_reps,
                    )?;
                    let output = sample.y[0];
                    data.push(selection.fidelity, selection.point.clone(), output);
                    cumulative_spend += cost;
                    accepted += 1;
                    acquisitions.push(Acquisition::new(
                        batch_number,
                        selection,
                        denormalize_point(&selection.point, &self.config.domain_bounds),
                        output,
                        cost,
                    ));
                }
                log::debug!(
                    "Batch {} of round {}: {} of {} queries accepted, spent {}",
                    batch_number,
                    round,
                    accepted,
                    batch.len(),
                    cumulative_spend
                );
                if accepted == 0 {
                    break;
                }
                batch_number += 1;
            }

            self.train(&data)?;
            let checkpoint = self.checkpoint(
                round,
                Some(cost_budget),
                cumulative_spend,
                &data,
                &test_set,
                acquisitions,
            );
            self.record(&mut history, checkpoint)?;
        }

        Ok(ExperimentResult {
            model: self.model,
            data,
            history,
        })
    }

    fn train(&mut self, data: &TrainingData) -> Result<()> {
        self.model
            .train_model(data, self.config.train_lr, self.config.train_epochs)
            .map_err(|source| ALError::Model {
                operation: "training",
                source,
            })
    }

    fn checkpoint(
        &self,
        round: usize,
        cost_constraint: Option<f64>,
        cumulative_spend: f64,
        data: &TrainingData,
        test_set: &TestSet,
        acquisitions: Vec<Acquisition>,
    ) -> Checkpoint {
        let elpp = (!test_set.x.is_empty())
            .then(|| self.model.evaluate_elpp(&test_set.x, &test_set.y));
        let prob_mae = test_set
            .true_p
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|true_p| {
                let predicted = self.model.predict_prob_mean(&test_set.x);
                predicted
                    .iter()
                    .zip(true_p)
                    .map(|(p, t)| (p - t).abs())
                    .sum::<f64>()
                    / true_p.len() as f64
            });
        Checkpoint {
            round,
            cost_constraint,
            cumulative_spend,
            n_lf: data.len(Fidelity::Low),
            n_hf: data.len(Fidelity::High),
            elpp,
            prob_mae,
            acquisitions,
        }
    }

    fn record(&self, history: &mut ExperimentHistory, checkpoint: Checkpoint) -> Result<()> {
        log::info!(
            "Checkpoint {}: spend {:.3}, {} LF / {} HF points, elpp {:?}",
            checkpoint.round,
            checkpoint.cumulative_spend,
            checkpoint.n_lf,
            checkpoint.n_hf,
            checkpoint.elpp
        );
        history.checkpoints.push(checkpoint);
        if let Some(path) = &self.output {
            history.write_to_file(path).map_err(ALError::Output)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::models::cokriging::CoKrigingModel;
    use crate::strategies::StrategyConfig;
    use crate::testing::{toy_linear_dataset, StubModel};

    fn config(cost_constraints: Vec<f64>) -> ALExperimentConfig {
        ConfigBuilder::new(5, 2, cost_constraints)
            .candidates(60, 30)
            .n_test(50)
            .n_reps(1)
            .train_epochs(20)
            .random_seed(17)
            .build()
            .unwrap()
    }

    fn run(strategy: StrategyConfig, cost_constraints: Vec<f64>) -> ExperimentResult<StubModel> {
        ExperimentRunner::new(
            toy_linear_dataset(0.1, 1.0, 5),
            strategy.build().unwrap(),
            config(cost_constraints),
            StubModel::default(),
        )
        .unwrap()
        .run_experiment()
        .unwrap()
    }

    fn random(gamma: f64, seed: u64) -> StrategyConfig {
        StrategyConfig::Random { gamma, seed }
    }

    fn mutual_information() -> StrategyConfig {
        StrategyConfig::MutualInformation {
            n_test_points: 20,
            max_pool_subset: 30,
            noise_variance: 0.1,
            seed: 3,
        }
    }

    #[test]
    fn single_round_toy_experiment() {
        let result = run(random(0.9, 1), vec![10.]);
        assert!(result.data.len(Fidelity::Low) >= 5);
        assert!(result.data.len(Fidelity::High) >= 2);
        let last = result.history.last().unwrap();
        assert!(last.cumulative_spend <= 10.);
        assert!(last.cumulative_spend > 9.);
        assert_eq!(result.history.checkpoints.len(), 2);
        assert_eq!(result.history.initial_cost, 0.5 + 2.);
        // Initial fit plus one retrain per round.
        assert_eq!(result.model.trained, 2);
        assert_eq!(
            result.model.last_training_sizes,
            (result.data.len(Fidelity::Low), result.data.len(Fidelity::High))
        );
    }

    #[test]
    fn spend_never_exceeds_any_constraint() {
        let result = run(mutual_information(), vec![2., 4.5, 4.5, 7.25]);
        let checkpoints = &result.history.checkpoints[1..];
        for checkpoint in checkpoints {
            let budget = checkpoint.cost_constraint.unwrap();
            assert!(checkpoint.cumulative_spend <= budget);
        }
        // An equal budget has less than one cheap query left to spend.
        let added = checkpoints[2].cumulative_spend - checkpoints[1].cumulative_spend;
        assert!(added < 0.1);
        // Every acquisition is paid for exactly once.
        let spent: f64 = result.history.acquisitions().map(|a| a.cost).sum();
        assert!((spent - checkpoints[3].cumulative_spend).abs() < 1e-9);
    }

    #[test]
    fn same_seed_same_experiment() {
        let a = run(mutual_information(), vec![3., 6.]);
        let b = run(mutual_information(), vec![3., 6.]);
        assert_eq!(
            a.history.spend_trajectory(),
            b.history.spend_trajectory()
        );
        assert_eq!(a.history, b.history);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn non_monotonic_budgets_skip_spent_rounds() {
        let result = run(random(0.5, 2), vec![5., 2., 6.]);
        let checkpoints = &result.history.checkpoints;
        assert_eq!(checkpoints.len(), 4);
        assert!(checkpoints[2].acquisitions.is_empty());
        assert_eq!(
            checkpoints[2].cumulative_spend,
            checkpoints[1].cumulative_spend
        );
        assert!(checkpoints[3].cumulative_spend <= 6.);
    }

    #[test]
    fn acquisitions_record_domain_units() {
        let config = ConfigBuilder::new(3, 2, vec![1.])
            .candidates(20, 0)
            .domain_bounds([(0., 10.), (-1., 1.)])
            .n_test(10)
            .n_reps(1)
            .random_seed(4)
            .build()
            .unwrap();
        let result = ExperimentRunner::new(
            toy_linear_dataset(0.1, 1.0, 5),
            random(0.5, 0).build().unwrap(),
            config,
            StubModel::default(),
        )
        .unwrap()
        .run_experiment()
        .unwrap();
        let acquisitions: Vec<_> = result.history.acquisitions().collect();
        assert!(!acquisitions.is_empty());
        for a in acquisitions {
            assert_eq!(a.fidelity, Fidelity::Low);
            assert!((a.input[0] - 10. * a.point[0]).abs() < 1e-12);
            assert!((a.input[1] - (2. * a.point[1] - 1.)).abs() < 1e-12);
        }
    }

    #[test]
    fn deserialized_configs_are_validated() {
        let mut json = serde_json::to_value(config(vec![5.])).unwrap();
        json["costConstraints"] = serde_json::json!([]);
        let unchecked: ALExperimentConfig = serde_json::from_value(json).unwrap();
        let err = ExperimentRunner::new(
            toy_linear_dataset(0.1, 1.0, 5),
            random(0.5, 0).build().unwrap(),
            unchecked,
            StubModel::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            ALError::Config {
                component: "ALExperimentConfig",
                ..
            }
        ));

        let mut no_reps = config(vec![5.]);
        no_reps.n_reps = 0;
        let err = ExperimentRunner::new(
            toy_linear_dataset(0.1, 1.0, 5),
            random(0.5, 0).build().unwrap(),
            no_reps,
            StubModel::default(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("n_reps"));
    }

    #[test]
    fn empty_pool_subset_is_rejected_before_running() {
        let strategy = StrategyConfig::BernoulliP {
            n_test_points: 10,
            max_pool_subset: 0,
            n_mc: 8,
            seed: 0,
        };
        let err = strategy.build().err().unwrap();
        assert!(matches!(err, ALError::Config { .. }));
    }

    #[test]
    fn training_failure_aborts_the_run() {
        let err = ExperimentRunner::new(
            toy_linear_dataset(0.1, 1.0, 5),
            mutual_information().build().unwrap(),
            config(vec![5.]),
            StubModel::failing(),
        )
        .unwrap()
        .run_experiment()
        .err()
        .unwrap();
        match err {
            ALError::Model { operation, source } => {
                assert_eq!(operation, "training");
                assert!(source.to_string().contains("NaN"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn strategy_configuration_errors_abort_the_run() {
        let strategy = StrategyConfig::MutualInformation {
            n_test_points: 10,
            max_pool_subset: 500,
            noise_variance: 0.1,
            seed: 0,
        };
        let err = ExperimentRunner::new(
            toy_linear_dataset(0.1, 1.0, 5),
            strategy.build().unwrap(),
            config(vec![5.]),
            StubModel::default(),
        )
        .unwrap()
        .run_experiment()
        .err()
        .unwrap();
        assert!(matches!(err, ALError::Config { .. }));
    }

    #[test]
    fn history_is_written_after_every_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let result = ExperimentRunner::new(
            toy_linear_dataset(0.1, 1.0, 5),
            random(0.5, 0).build().unwrap(),
            config(vec![2., 4.]),
            StubModel::default(),
        )
        .unwrap()
        .with_output(&path)
        .run_experiment()
        .unwrap();
        let written = ExperimentHistory::read_from_file(&path).unwrap();
        assert_eq!(written.checkpoints.len(), 3);
        assert_eq!(
            written.acquisitions().count(),
            result.history.acquisitions().count()
        );
        for (a, b) in written
            .spend_trajectory()
            .iter()
            .zip(result.history.spend_trajectory())
        {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn runs_end_to_end_with_the_cokriging_model() {
        let config = ConfigBuilder::new(20, 10, vec![3.])
            .candidates(40, 20)
            .n_test(40)
            .n_reps(3)
            .train_lr(0.05)
            .train_epochs(30)
            .random_seed(9)
            .model_arg("fit_kernel", false)
            .build()
            .unwrap();
        let model = CoKrigingModel::from_model_args(&config.model_args).unwrap();
        let strategy = StrategyConfig::BernoulliPRepeats {
            n_test_points: 15,
            max_pool_subset: 20,
            n_mc: 16,
            n_max: 3,
            repeat_jitter: 0.01,
            seed: 6,
        };
        let result = ExperimentRunner::new(
            toy_linear_dataset(0.1, 1.0, 8),
            strategy.build().unwrap(),
            config,
            model,
        )
        .unwrap()
        .run_experiment()
        .unwrap();
        assert!(result.model.is_trained());
        let last = result.history.last().unwrap();
        assert!(last.cumulative_spend <= 3.);
        assert!(last.elpp.is_some_and(f64::is_finite));
        assert!(last.prob_mae.unwrap() < 0.5);
        let acquired = result.data.len(Fidelity::Low) + result.data.len(Fidelity::High);
        assert!(acquired > 30);
    }
}
