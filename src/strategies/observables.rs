use std::ops::Range;

use rand::{rngs::StdRng, Rng};

use super::bernoulli::probit_observation_noise;
use super::mutual_information::{InformationScore, InformationStrategy, PoolSource, RepeatPolicy};
use crate::errors::{ALError, Result};
use crate::math::{binary_entropy, norm_ppf, probit_mean};
use crate::models::Covariance;

/// Information the observed label `y_c` carries about the latent at each reference point.
///
/// `I(y_c; f_r) = h(p_c) - E_{f_r}[h(p_c | f_r)]`, with the expectation estimated from
/// `n_y_samples` draws of `f_r`.
pub struct ObservableInformation {
    pub n_y_samples: usize,
}

impl ObservableInformation {
    /// `E_{f_r}[h(p_c | f_r)]` by sampling `f_r` from its marginal.
    fn conditional_entropy(
        &self,
        mean: &[f64],
        cov: &Covariance,
        (node, r): (usize, usize),
        rng: &mut StdRng,
    ) -> f64 {
        let var_r = cov.variance(r);
        let k = cov.get(node, r);
        let gain = k / var_r;
        let cond_var = (cov.variance(node) - gain * k).max(0.);
        let sd_r = var_r.sqrt();

        let mut total = 0.;
        for _ in 0..self.n_y_samples {
            let shift = gain * sd_r * norm_ppf(rng.gen());
            total += binary_entropy(probit_mean(mean[node] + shift, cond_var));
        }
        total / self.n_y_samples as f64
    }
}

impl InformationScore for ObservableInformation {
    fn information(
        &self,
        mean: &[f64],
        cov: &Covariance,
        node: usize,
        refs: Range<usize>,
        rng: &mut StdRng,
    ) -> f64 {
        let var_c = cov.variance(node);
        if refs.is_empty() || !(var_c > 0.) {
            return 0.;
        }
        let marginal = binary_entropy(probit_mean(mean[node], var_c));

        let n = refs.len() as f64;
        let mut total = 0.;
        for r in refs {
            if !(cov.variance(r) > 0.) {
                continue;
            }
            let conditional = self.conditional_entropy(mean, cov, (node, r), rng);
            total += (marginal - conditional).max(0.);
        }
        total / n
    }

    fn observation_noise(&self, mean: &[f64], cov: &Covariance, node: usize) -> f64 {
        probit_observation_noise(mean, cov, node)
    }
}

/// Grid candidates scored by the information their binary outcome carries about the
/// reference latents.
pub type ObservablesGridStrategy = InformationStrategy<ObservableInformation>;

impl ObservablesGridStrategy {
    pub fn new(
        n_test_points: usize,
        max_pool_subset: usize,
        points_per_dim: usize,
        n_y_samples: usize,
        seed: u64,
    ) -> Result<Self> {
        const NAME: &str = "MutualInformationGridStrategyObservables";
        if n_y_samples == 0 {
            return Err(ALError::config(NAME, "N_y_samples must be at least 1"));
        }
        Self::with_score(
            NAME,
            ObservableInformation { n_y_samples },
            PoolSource::Grid { points_per_dim },
            n_test_points,
            Some(max_pool_subset),
            RepeatPolicy::SINGLE,
            seed,
        )
    }
}
