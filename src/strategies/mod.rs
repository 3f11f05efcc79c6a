pub mod bernoulli;
pub mod grid;
pub mod max_uncertainty;
pub mod mutual_information;
pub mod observables;
pub mod random;

use std::cmp::Ordering;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::BiFidelityDataset;
use crate::errors::{ALError, Result};
use crate::library::{in_unit_cube, random_unit_points, Fidelity, Selection, TrainingData};
use crate::models::BiFidelityModel;

use self::bernoulli::BernoulliStrategy;
use self::max_uncertainty::MaxUncertaintyStrategy;
use self::mutual_information::MutualInformationStrategy;
use self::observables::ObservablesGridStrategy;
use self::random::RandomStrategy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionPhase {
    AwaitingCandidates,
    Scoring,
    Selected,
    /// The remaining budget cannot pay for any candidate.
    Exhausted,
}

/// Everything a strategy may look at when choosing the next batch.
pub struct SelectionContext<'a> {
    pub model: &'a dyn BiFidelityModel,
    pub dataset: &'a BiFidelityDataset,
    pub data: &'a TrainingData,
    pub remaining_budget: f64,
    pub n_cand_lf: usize,
    pub n_cand_hf: usize,
    pub dims: usize,
}

impl SelectionContext<'_> {
    /// Cheapest fidelity offered by a pool sized from `n_cand_lf` / `n_cand_hf`.
    fn cheapest_available(&self) -> f64 {
        let mut cheapest = f64::INFINITY;
        if self.n_cand_lf > 0 {
            cheapest = cheapest.min(self.dataset.c_lf());
        }
        if self.n_cand_hf > 0 {
            cheapest = cheapest.min(self.dataset.c_hf());
        }
        cheapest
    }
}

pub trait AcquisitionStrategy {
    fn name(&self) -> &'static str;

    fn phase(&self) -> SelectionPhase;

    /// Chooses the next batch of `(point, fidelity)` queries whose total cost fits in
    /// `ctx.remaining_budget`.
    ///
    /// Returns [`ALError::InsufficientBudget`] when not even the cheapest fidelity is affordable.
    fn select_batch(&mut self, ctx: &SelectionContext<'_>) -> Result<Vec<Selection>>;
}

/// Fails with `InsufficientBudget` and moves to `Exhausted` if `cheapest` is not affordable.
pub(crate) fn check_budget(
    ctx: &SelectionContext<'_>,
    cheapest: f64,
    phase: &mut SelectionPhase,
) -> Result<()> {
    if cheapest > ctx.remaining_budget {
        *phase = SelectionPhase::Exhausted;
        log::trace!(
            "Strategy exhausted: {} left, cheapest {}",
            ctx.remaining_budget,
            cheapest
        );
        return Err(ALError::InsufficientBudget {
            remaining: ctx.remaining_budget,
            cheapest,
        });
    }
    Ok(())
}

/// Points considered for acquisition in one call to `select_batch`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CandidatePool {
    pub points: Vec<Vec<f64>>,
    pub fidelities: Vec<Fidelity>,
}

impl CandidatePool {
    pub fn uniform(n_lf: usize, n_hf: usize, dims: usize, rng: &mut impl Rng) -> Self {
        let mut points = random_unit_points(n_lf, dims, rng);
        points.extend(random_unit_points(n_hf, dims, rng));
        let fidelities = std::iter::repeat(Fidelity::Low)
            .take(n_lf)
            .chain(std::iter::repeat(Fidelity::High).take(n_hf))
            .collect();
        Self { points, fidelities }
    }

    /// Every location offered at both fidelities.
    pub fn at_both_fidelities(locations: Vec<Vec<f64>>) -> Self {
        let n = locations.len();
        let mut points = locations.clone();
        points.extend(locations);
        let fidelities = std::iter::repeat(Fidelity::Low)
            .take(n)
            .chain(std::iter::repeat(Fidelity::High).take(n))
            .collect();
        Self { points, fidelities }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Cost of the cheapest candidate; infinite for an empty pool.
    pub fn cheapest_cost(&self, dataset: &BiFidelityDataset) -> f64 {
        self.fidelities
            .iter()
            .map(|f| dataset.cost(*f))
            .fold(f64::INFINITY, f64::min)
    }

    /// Keeps `max_pool_subset` candidates chosen without replacement, in pool order.
    pub fn subsample(
        self,
        max_pool_subset: usize,
        component: &'static str,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        if max_pool_subset > self.len() {
            return Err(ALError::config(
                component,
                format!(
                    "max_pool_subset {} exceeds the generated pool size {}",
                    max_pool_subset,
                    self.len()
                ),
            ));
        }
        let chosen = rand::seq::index::sample(rng, self.len(), max_pool_subset);
        let mut chosen = chosen.into_vec();
        chosen.sort_unstable();
        Ok(Self {
            points: chosen
                .iter()
                .map(|i| self.points[*i].clone())
                .collect(),
            fidelities: chosen
                .iter()
                .map(|i| self.fidelities[*i])
                .collect(),
        })
    }

    /// Splits the pool into LF and HF point lists. `nodes[i]` is the position of
    /// candidate `i` in the concatenation `lf ++ hf`.
    pub fn split(&self) -> (Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<usize>) {
        let mut low = Vec::new();
        let mut high = Vec::new();
        let mut slots = Vec::with_capacity(self.len());
        for (point, fidelity) in self.points.iter().zip(&self.fidelities) {
            match fidelity {
                Fidelity::Low => {
                    slots.push((Fidelity::Low, low.len()));
                    low.push(point.clone());
                }
                Fidelity::High => {
                    slots.push((Fidelity::High, high.len()));
                    high.push(point.clone());
                }
            }
        }
        let n_low = low.len();
        let nodes = slots
            .into_iter()
            .map(|(fidelity, i)| match fidelity {
                Fidelity::Low => i,
                Fidelity::High => n_low + i,
            })
            .collect();
        (low, high, nodes)
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Candidate {
    pub index: usize,
    pub utility: f64,
    pub cost: f64,
}

/// Ranking used by every greedy strategy: higher utility, then lower cost, then lower pool index.
pub(crate) fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.utility
        .total_cmp(&a.utility)
        .then(a.cost.total_cmp(&b.cost))
        .then(a.index.cmp(&b.index))
}

/// Rejects selections outside the normalized domain instead of clamping them.
pub fn validate_batch(strategy: &str, batch: &[Selection]) -> Result<()> {
    match batch.iter().find(|s| !in_unit_cube(&s.point)) {
        Some(selection) => Err(ALError::OutOfDomain {
            component: format!("strategy {}", strategy),
            point: selection.point.clone(),
        }),
        None => Ok(()),
    }
}

/// Strategy choice made at experiment construction time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
#[serde(tag = "type")]
pub enum StrategyConfig {
    MutualInformation {
        n_test_points: usize,
        max_pool_subset: usize,
        noise_variance: f64,
        seed: u64,
    },
    /// Whole uniform pool scored against `n_mc` Monte Carlo reference draws.
    MutualInformationBmfal {
        n_mc: usize,
        noise_variance: f64,
        seed: u64,
    },
    MutualInformationGrid {
        n_test_points: usize,
        max_pool_subset: usize,
        points_per_dim: usize,
        noise_variance: f64,
        seed: u64,
    },
    MutualInformationGridObservables {
        n_test_points: usize,
        max_pool_subset: usize,
        points_per_dim: usize,
        n_y_samples: usize,
        seed: u64,
    },
    BernoulliP {
        n_test_points: usize,
        max_pool_subset: usize,
        n_mc: usize,
        seed: u64,
    },
    BernoulliPRepeats {
        n_test_points: usize,
        max_pool_subset: usize,
        n_mc: usize,
        n_max: usize,
        repeat_jitter: f64,
        seed: u64,
    },
    Random {
        gamma: f64,
        seed: u64,
    },
    MaxUncertainty {
        beta: f64,
        gamma: f64,
        seed: u64,
    },
}

impl StrategyConfig {
    pub fn build(&self) -> Result<Box<dyn AcquisitionStrategy>> {
        let strategy: Box<dyn AcquisitionStrategy> = match *self {
            StrategyConfig::MutualInformation {
                n_test_points,
                max_pool_subset,
                noise_variance,
                seed,
            } => Box::new(MutualInformationStrategy::new(
                n_test_points,
                max_pool_subset,
                noise_variance,
                seed,
            )?),
            StrategyConfig::MutualInformationBmfal {
                n_mc,
                noise_variance,
                seed,
            } => Box::new(MutualInformationStrategy::bmfal(
                n_mc,
                noise_variance,
                seed,
            )?),
            StrategyConfig::MutualInformationGrid {
                n_test_points,
                max_pool_subset,
                points_per_dim,
                noise_variance,
                seed,
            } => Box::new(MutualInformationStrategy::grid(
                n_test_points,
                max_pool_subset,
                points_per_dim,
                noise_variance,
                seed,
            )?),
            StrategyConfig::MutualInformationGridObservables {
                n_test_points,
                max_pool_subset,
                points_per_dim,
                n_y_samples,
                seed,
            } => Box::new(ObservablesGridStrategy::new(
                n_test_points,
                max_pool_subset,
                points_per_dim,
                n_y_samples,
                seed,
            )?),
            StrategyConfig::BernoulliP {
                n_test_points,
                max_pool_subset,
                n_mc,
                seed,
            } => Box::new(BernoulliStrategy::new(
                n_test_points,
                max_pool_subset,
                n_mc,
                seed,
            )?),
            StrategyConfig::BernoulliPRepeats {
                n_test_points,
                max_pool_subset,
                n_mc,
                n_max,
                repeat_jitter,
                seed,
            } => Box::new(BernoulliStrategy::with_repeats(
                n_test_points,
                max_pool_subset,
                n_mc,
                n_max,
                repeat_jitter,
                seed,
            )?),
            StrategyConfig::Random { gamma, seed } => Box::new(RandomStrategy::new(gamma, seed)?),
            StrategyConfig::MaxUncertainty { beta, gamma, seed } => {
                Box::new(MaxUncertaintyStrategy::new(beta, gamma, seed)?)
            }
        };
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn uniform_pool_lists_lf_before_hf() {
        let mut rng = StdRng::seed_from_u64(1);
        let pool = CandidatePool::uniform(3, 2, 2, &mut rng);
        assert_eq!(pool.len(), 5);
        assert_eq!(
            pool.fidelities,
            vec![
                Fidelity::Low,
                Fidelity::Low,
                Fidelity::Low,
                Fidelity::High,
                Fidelity::High
            ]
        );
        assert!(pool
            .points
            .iter()
            .all(|p| p.len() == 2 && in_unit_cube(p)));
    }

    #[test]
    fn subsample_keeps_pool_order_and_rejects_oversized_requests() {
        let mut rng = StdRng::seed_from_u64(2);
        let pool = CandidatePool::uniform(20, 10, 1, &mut rng);
        let subset = pool.clone().subsample(8, "test", &mut rng).unwrap();
        assert_eq!(subset.len(), 8);
        let positions: Vec<usize> = subset
            .points
            .iter()
            .map(|p| pool.points.iter().position(|q| q == p).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        let err = pool.subsample(31, "test", &mut rng).unwrap_err();
        assert!(matches!(err, ALError::Config { component: "test", .. }));
    }

    #[test]
    fn split_maps_candidates_to_joint_nodes() {
        let pool = CandidatePool {
            points: vec![vec![0.1], vec![0.2], vec![0.3], vec![0.4]],
            fidelities: vec![Fidelity::High, Fidelity::Low, Fidelity::High, Fidelity::Low],
        };
        let (low, high, nodes) = pool.split();
        assert_eq!(low, vec![vec![0.2], vec![0.4]]);
        assert_eq!(high, vec![vec![0.1], vec![0.3]]);
        assert_eq!(nodes, vec![2, 0, 3, 1]);
    }

    #[test]
    fn ranking_breaks_ties_by_cost_then_index() {
        let mut candidates = vec![
            Candidate {
                index: 3,
                utility: 1.0,
                cost: 1.0,
            },
            Candidate {
                index: 2,
                utility: 1.0,
                cost: 0.1,
            },
            Candidate {
                index: 0,
                utility: 0.5,
                cost: 0.1,
            },
            Candidate {
                index: 1,
                utility: 1.0,
                cost: 0.1,
            },
        ];
        candidates.sort_by(rank);
        let order: Vec<usize> = candidates.iter().map(|c| c.index).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn out_of_domain_selections_are_rejected() {
        let batch = vec![Selection {
            point: vec![0.5, 1.01],
            fidelity: Fidelity::Low,
            pool_index: 0,
            repeat: 0,
            utility: 1.,
        }];
        let err = validate_batch("RandomStrategy", &batch).unwrap_err();
        assert!(err.to_string().contains("RandomStrategy"));
        assert!(validate_batch("RandomStrategy", &[]).is_ok());
    }

    #[test]
    fn strategy_config_is_tagged() {
        let config = StrategyConfig::BernoulliPRepeats {
            n_test_points: 100,
            max_pool_subset: 50,
            n_mc: 32,
            n_max: 10,
            repeat_jitter: 0.01,
            seed: 0,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "bernoulliPRepeats");
        assert_eq!(json["maxPoolSubset"], 50);
        assert_eq!(json["repeatJitter"], 0.01);
        assert!(json.get("max_pool_subset").is_none());
        let strategy = config.build().unwrap();
        assert_eq!(strategy.name(), "BernoulliPRepeatsStrategy");
        assert_eq!(strategy.phase(), SelectionPhase::AwaitingCandidates);

        let invalid = StrategyConfig::Random {
            gamma: 1.5,
            seed: 0,
        };
        assert!(invalid.build().is_err());
    }

    #[test]
    fn strategy_config_reads_camel_case_fields() {
        let config: StrategyConfig = serde_json::from_str(
            r#"{"type": "mutualInformationGridObservables", "nTestPoints": 20,
                "maxPoolSubset": 30, "pointsPerDim": 5, "nYSamples": 16, "seed": 1}"#,
        )
        .unwrap();
        let strategy = config.build().unwrap();
        assert_eq!(strategy.name(), "MutualInformationGridStrategyObservables");

        let config: StrategyConfig = serde_json::from_str(
            r#"{"type": "mutualInformationBmfal", "nMc": 40, "noiseVariance": 0.1, "seed": 1}"#,
        )
        .unwrap();
        let strategy = config.build().unwrap();
        assert_eq!(strategy.name(), "MutualInformationBMFALStrategy");
    }

    #[test]
    fn pool_cheapest_cost_follows_offered_fidelities() {
        let dataset = crate::testing::toy_linear_dataset(0.1, 1.0, 0);
        let high_only = CandidatePool {
            points: vec![vec![0.5]],
            fidelities: vec![Fidelity::High],
        };
        assert_eq!(high_only.cheapest_cost(&dataset), 1.0);
        let both = CandidatePool::at_both_fidelities(vec![vec![0.5]]);
        assert_eq!(both.cheapest_cost(&dataset), 0.1);
        let empty = CandidatePool::default();
        assert_eq!(empty.cheapest_cost(&dataset), f64::INFINITY);
    }
}
