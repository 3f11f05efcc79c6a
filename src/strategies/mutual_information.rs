use std::ops::Range;

use rand::{rngs::StdRng, Rng, SeedableRng};

use super::grid::grid_pool;
use super::{
    check_budget, rank, AcquisitionStrategy, Candidate, CandidatePool, SelectionContext,
    SelectionPhase,
};
use crate::errors::{ALError, Result};
use crate::library::{random_unit_points, Fidelity, Selection};
use crate::models::{Covariance, LatentJoint};

/// How much a noisy observation of one latent node tells us about the reference nodes.
pub trait InformationScore {
    fn information(
        &self,
        mean: &[f64],
        cov: &Covariance,
        node: usize,
        refs: Range<usize>,
        rng: &mut StdRng,
    ) -> f64;

    /// Variance of the observation noise used when conditioning on a picked node.
    fn observation_noise(&self, mean: &[f64], cov: &Covariance, node: usize) -> f64;
}

/// Mean over reference nodes of the pairwise Gaussian mutual information
/// `-0.5 ln(1 - k_cr^2 / ((s_c + tau^2) s_r))`.
pub struct GaussianInformation {
    pub noise_variance: f64,
}

impl InformationScore for GaussianInformation {
    fn information(
        &self,
        _mean: &[f64],
        cov: &Covariance,
        node: usize,
        refs: Range<usize>,
        _rng: &mut StdRng,
    ) -> f64 {
        if refs.is_empty() {
            return 0.;
        }
        let n = refs.len() as f64;
        let denom = cov.variance(node) + self.noise_variance;
        refs.map(|r| {
            let var_r = cov.variance(r);
            if !(var_r > 0.) {
                return 0.;
            }
            let rho2 = cov.get(node, r).powi(2) / (denom * var_r);
            let rho2 = rho2.clamp(0., 1. - 1e-12);
            -0.5 * (1. - rho2).ln()
        })
        .sum::<f64>()
            / n
    }

    fn observation_noise(&self, _mean: &[f64], _cov: &Covariance, _node: usize) -> f64 {
        self.noise_variance
    }
}

/// Limits on how often one base candidate may appear in a batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct RepeatPolicy {
    pub n_max: usize,
    pub jitter: f64,
}

impl RepeatPolicy {
    pub const SINGLE: RepeatPolicy = RepeatPolicy {
        n_max: 1,
        jitter: 0.,
    };

    /// Offsets every coordinate uniformly within `±jitter`, clipped to the unit cube.
    /// Clipping keeps the point within `jitter` of the base.
    fn jittered(&self, base: &[f64], rng: &mut StdRng) -> Vec<f64> {
        if self.jitter <= 0. {
            return base.to_vec();
        }
        let jitter = self.jitter;
        base.iter()
            .map(|v| (v + rng.gen_range(-jitter..=jitter)).clamp(0., 1.))
            .collect()
    }
}

/// Greedy cost-weighted selection over a joint latent distribution.
///
/// After each pick the covariance is conditioned on the picked node so later scores
/// account for what the batch already contains.
#[allow(clippy::too_many_arguments)]
pub(crate) fn select_greedy(
    score: &impl InformationScore,
    pool: &CandidatePool,
    nodes: &[usize],
    refs: Range<usize>,
    joint: LatentJoint,
    cost_of: impl Fn(Fidelity) -> f64,
    remaining_budget: f64,
    repeats: RepeatPolicy,
    rng: &mut StdRng,
) -> Vec<Selection> {
    let LatentJoint {
        mean,
        mut covariance,
    } = joint;
    let mut picks = vec![0usize; pool.len()];
    let mut used = 0.;
    let mut batch = Vec::new();

    loop {
        let mut best: Option<Candidate> = None;
        for index in 0..pool.len() {
            if picks[index] >= repeats.n_max {
                continue;
            }
            let cost = cost_of(pool.fidelities[index]);
            if used + cost > remaining_budget {
                continue;
            }
            let information =
                score.information(&mean, &covariance, nodes[index], refs.clone(), rng);
            let utility = if information.is_finite() {
                information / cost
            } else {
                0.
            };
            let candidate = Candidate {
                index,
                utility,
                cost,
            };
            best = match best {
                Some(current) if rank(&current, &candidate).is_le() => Some(current),
                _ => Some(candidate),
            };
        }
        let Some(best) = best else {
            break;
        };

        let occurrence = picks[best.index];
        let base = &pool.points[best.index];
        let point = if occurrence == 0 {
            base.clone()
        } else {
            repeats.jittered(base, rng)
        };
        batch.push(Selection {
            point,
            fidelity: pool.fidelities[best.index],
            pool_index: best.index,
            repeat: occurrence,
            utility: best.utility,
        });
        picks[best.index] += 1;
        used += best.cost;

        let node = nodes[best.index];
        let noise = score.observation_noise(&mean, &covariance, node);
        covariance.condition_on(node, noise);
    }
    batch
}

/// Scores a pool against a fresh reference set and runs the greedy selection.
#[allow(clippy::too_many_arguments)]
pub(crate) fn select_informative_batch(
    component: &'static str,
    score: &impl InformationScore,
    pool: CandidatePool,
    n_test_points: usize,
    repeats: RepeatPolicy,
    ctx: &SelectionContext<'_>,
    phase: &mut SelectionPhase,
    rng: &mut StdRng,
) -> Result<Vec<Selection>> {
    let refs = random_unit_points(n_test_points, ctx.dims, rng);
    *phase = SelectionPhase::Scoring;
    log::trace!("{} scoring {} candidates", component, pool.len());

    let (x_l, x_h, nodes) = pool.split();
    let joint = ctx
        .model
        .predict_multi_fidelity_latent_joint(&x_l, &x_h, &refs);
    let expected = x_l.len() + x_h.len() + refs.len();
    if joint.covariance.len() != expected || joint.mean.len() != expected {
        return Err(ALError::Model {
            operation: "predict_multi_fidelity_latent_joint",
            source: anyhow::anyhow!(
                "expected a joint over {} points, got mean {} and covariance {}",
                expected,
                joint.mean.len(),
                joint.covariance.len()
            ),
        });
    }

    let ref_nodes = x_l.len() + x_h.len()..expected;
    let batch = select_greedy(
        score,
        &pool,
        &nodes,
        ref_nodes,
        joint,
        |f| ctx.dataset.cost(f),
        ctx.remaining_budget,
        repeats,
        rng,
    );
    *phase = SelectionPhase::Selected;
    log::debug!("{} selected {} queries", component, batch.len());
    Ok(batch)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum PoolSource {
    Uniform,
    Grid { points_per_dim: usize },
}

/// Greedy batch selection driven by an [`InformationScore`] over a joint latent prediction.
///
/// The concrete strategies are aliases of this type with their own constructors.
pub struct InformationStrategy<S> {
    name: &'static str,
    n_test_points: usize,
    max_pool_subset: Option<usize>,
    score: S,
    source: PoolSource,
    repeats: RepeatPolicy,
    rng: StdRng,
    phase: SelectionPhase,
}

/// Cost-weighted mutual information about a random reference set, using a Gaussian
/// observation model.
pub type MutualInformationStrategy = InformationStrategy<GaussianInformation>;

impl<S: InformationScore> InformationStrategy<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn with_score(
        name: &'static str,
        score: S,
        source: PoolSource,
        n_test_points: usize,
        max_pool_subset: Option<usize>,
        repeats: RepeatPolicy,
        seed: u64,
    ) -> Result<Self> {
        if n_test_points == 0 {
            return Err(ALError::config(name, "n_test_points must be at least 1"));
        }
        if max_pool_subset == Some(0) {
            return Err(ALError::config(name, "max_pool_subset must be at least 1"));
        }
        if let PoolSource::Grid { points_per_dim: 0 } = source {
            return Err(ALError::config(name, "points_per_dim must be at least 1"));
        }
        Ok(Self {
            name,
            n_test_points,
            max_pool_subset,
            score,
            source,
            repeats,
            rng: StdRng::seed_from_u64(seed),
            phase: SelectionPhase::AwaitingCandidates,
        })
    }
}

fn check_noise_variance(name: &'static str, noise_variance: f64) -> Result<()> {
    if noise_variance > 0. && noise_variance.is_finite() {
        Ok(())
    } else {
        Err(ALError::config(
            name,
            format!("noise_variance must be positive, got {}", noise_variance),
        ))
    }
}

impl MutualInformationStrategy {
    pub fn new(
        n_test_points: usize,
        max_pool_subset: usize,
        noise_variance: f64,
        seed: u64,
    ) -> Result<Self> {
        const NAME: &str = "MutualInformationStrategy";
        check_noise_variance(NAME, noise_variance)?;
        Self::with_score(
            NAME,
            GaussianInformation { noise_variance },
            PoolSource::Uniform,
            n_test_points,
            Some(max_pool_subset),
            RepeatPolicy::SINGLE,
            seed,
        )
    }

    /// Scores the whole uniform pool against `n_mc` reference points drawn afresh for
    /// every batch, a Monte Carlo estimate of the information about `f_H` over the domain.
    pub fn bmfal(n_mc: usize, noise_variance: f64, seed: u64) -> Result<Self> {
        const NAME: &str = "MutualInformationBMFALStrategy";
        if n_mc == 0 {
            return Err(ALError::config(NAME, "N_MC must be at least 1"));
        }
        check_noise_variance(NAME, noise_variance)?;
        Self::with_score(
            NAME,
            GaussianInformation { noise_variance },
            PoolSource::Uniform,
            n_mc,
            None,
            RepeatPolicy::SINGLE,
            seed,
        )
    }

    /// Same score as [`MutualInformationStrategy::new`], over a regular grid.
    pub fn grid(
        n_test_points: usize,
        max_pool_subset: usize,
        points_per_dim: usize,
        noise_variance: f64,
        seed: u64,
    ) -> Result<Self> {
        const NAME: &str = "MutualInformationGridStrategy";
        check_noise_variance(NAME, noise_variance)?;
        Self::with_score(
            NAME,
            GaussianInformation { noise_variance },
            PoolSource::Grid { points_per_dim },
            n_test_points,
            Some(max_pool_subset),
            RepeatPolicy::SINGLE,
            seed,
        )
    }
}

impl<S: InformationScore> AcquisitionStrategy for InformationStrategy<S> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn phase(&self) -> SelectionPhase {
        self.phase
    }

    fn select_batch(&mut self, ctx: &SelectionContext<'_>) -> Result<Vec<Selection>> {
        self.phase = SelectionPhase::AwaitingCandidates;
        let mut pool = match self.source {
            PoolSource::Uniform => {
                CandidatePool::uniform(ctx.n_cand_lf, ctx.n_cand_hf, ctx.dims, &mut self.rng)
            }
            PoolSource::Grid { points_per_dim } => grid_pool(ctx.dims, points_per_dim),
        };
        check_budget(ctx, pool.cheapest_cost(ctx.dataset), &mut self.phase)?;
        if let Some(max_pool_subset) = self.max_pool_subset {
            pool = pool.subsample(max_pool_subset, self.name, &mut self.rng)?;
        }

        select_informative_batch(
            self.name,
            &self.score,
            pool,
            self.n_test_points,
            self.repeats,
            ctx,
            &mut self.phase,
            &mut self.rng,
        )
    }
}
