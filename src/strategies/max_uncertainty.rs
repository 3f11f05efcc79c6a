use rand::{rngs::StdRng, SeedableRng};

use super::{
    check_budget, rank, AcquisitionStrategy, Candidate, CandidatePool, SelectionContext,
    SelectionPhase,
};
use crate::errors::{ALError, Result};
use crate::library::{Fidelity, Selection};

/// Queries where the predicted high fidelity probability is most uncertain.
///
/// Utility is `w * Var[p_H(x)] / cost^beta` with `w = gamma` for low fidelity candidates
/// and `w = 1` for high fidelity ones.
pub struct MaxUncertaintyStrategy {
    beta: f64,
    gamma: f64,
    rng: StdRng,
    phase: SelectionPhase,
}

impl MaxUncertaintyStrategy {
    pub fn new(beta: f64, gamma: f64, seed: u64) -> Result<Self> {
        if !beta.is_finite() || beta < 0. {
            return Err(ALError::config(
                "MaxUncertaintyStrategy",
                format!("beta must be a non-negative number, got {}", beta),
            ));
        }
        if !(0. ..=1.).contains(&gamma) {
            return Err(ALError::config(
                "MaxUncertaintyStrategy",
                format!("gamma must lie in [0, 1], got {}", gamma),
            ));
        }
        Ok(Self {
            beta,
            gamma,
            rng: StdRng::seed_from_u64(seed),
            phase: SelectionPhase::AwaitingCandidates,
        })
    }
}

impl AcquisitionStrategy for MaxUncertaintyStrategy {
    fn name(&self) -> &'static str {
        "MaxUncertaintyStrategy"
    }

    fn phase(&self) -> SelectionPhase {
        self.phase
    }

    fn select_batch(&mut self, ctx: &SelectionContext<'_>) -> Result<Vec<Selection>> {
        self.phase = SelectionPhase::AwaitingCandidates;
        check_budget(ctx, ctx.cheapest_available(), &mut self.phase)?;
        let pool = CandidatePool::uniform(ctx.n_cand_lf, ctx.n_cand_hf, ctx.dims, &mut self.rng);
        self.phase = SelectionPhase::Scoring;

        let variances = ctx.model.predict_prob_var(&pool.points);
        if variances.len() != pool.len() {
            return Err(ALError::Model {
                operation: "predict_prob_var",
                source: anyhow::anyhow!(
                    "expected {} variances, got {}",
                    pool.len(),
                    variances.len()
                ),
            });
        }
        let mut ranked: Vec<Candidate> = pool
            .fidelities
            .iter()
            .zip(variances)
            .enumerate()
            .map(|(index, (fidelity, variance))| {
                let cost = ctx.dataset.cost(*fidelity);
                let weight = match fidelity {
                    Fidelity::Low => self.gamma,
                    Fidelity::High => 1.,
                };
                let utility = weight * variance / cost.powf(self.beta);
                Candidate {
                    index,
                    utility: if utility.is_finite() { utility } else { 0. },
                    cost,
                }
            })
            .collect();
        ranked.sort_by(rank);

        let mut used = 0.;
        let mut batch = Vec::new();
        for candidate in ranked {
            if used + candidate.cost > ctx.remaining_budget {
                continue;
            }
            used += candidate.cost;
            batch.push(Selection {
                point: pool.points[candidate.index].clone(),
                fidelity: pool.fidelities[candidate.index],
                pool_index: candidate.index,
                repeat: 0,
                utility: candidate.utility,
            });
        }
        self.phase = SelectionPhase::Selected;
        log::debug!("MaxUncertaintyStrategy selected {} queries", batch.len());
        Ok(batch)
    }
}
