use rand::{rngs::StdRng, Rng, SeedableRng};

use super::{check_budget, AcquisitionStrategy, CandidatePool, SelectionContext, SelectionPhase};
use crate::errors::{ALError, Result};
use crate::library::{Fidelity, Selection};

/// Baseline: random candidates, LF with probability `gamma`.
pub struct RandomStrategy {
    gamma: f64,
    rng: StdRng,
    phase: SelectionPhase,
}

impl RandomStrategy {
    pub fn new(gamma: f64, seed: u64) -> Result<Self> {
        if !(0. ..=1.).contains(&gamma) {
            return Err(ALError::config(
                "RandomStrategy",
                format!("gamma must lie in [0, 1], got {}", gamma),
            ));
        }
        Ok(Self {
            gamma,
            rng: StdRng::seed_from_u64(seed),
            phase: SelectionPhase::AwaitingCandidates,
        })
    }
}

impl AcquisitionStrategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "RandomStrategy"
    }

    fn phase(&self) -> SelectionPhase {
        self.phase
    }

    fn select_batch(&mut self, ctx: &SelectionContext<'_>) -> Result<Vec<Selection>> {
        self.phase = SelectionPhase::AwaitingCandidates;
        check_budget(ctx, ctx.cheapest_available(), &mut self.phase)?;
        let pool = CandidatePool::uniform(ctx.n_cand_lf, ctx.n_cand_hf, ctx.dims, &mut self.rng);
        self.phase = SelectionPhase::Scoring;

        let mut low: Vec<usize> = (0..ctx.n_cand_lf).collect();
        let mut high: Vec<usize> = (ctx.n_cand_lf..pool.len()).collect();
        let (c_lf, c_hf) = (ctx.dataset.c_lf(), ctx.dataset.c_hf());
        let mut used = 0.;
        let mut batch = Vec::new();
        loop {
            let low_ok = !low.is_empty() && used + c_lf <= ctx.remaining_budget;
            let high_ok = !high.is_empty() && used + c_hf <= ctx.remaining_budget;
            let fidelity = match (low_ok, high_ok) {
                (false, false) => break,
                (true, false) => Fidelity::Low,
                (false, true) => Fidelity::High,
                (true, true) => {
                    if self.rng.gen_bool(self.gamma) {
                        Fidelity::Low
                    } else {
                        Fidelity::High
                    }
                }
            };
            let bucket = match fidelity {
                Fidelity::Low => &mut low,
                Fidelity::High => &mut high,
            };
            let index = bucket.swap_remove(self.rng.gen_range(0..bucket.len()));
            used += ctx.dataset.cost(fidelity);
            batch.push(Selection {
                point: pool.points[index].clone(),
                fidelity,
                pool_index: index,
                repeat: 0,
                utility: 0.,
            });
        }
        self.phase = SelectionPhase::Selected;
        log::debug!("RandomStrategy selected {} queries", batch.len());
        Ok(batch)
    }
}
