use std::ops::Range;

use rand::{rngs::StdRng, Rng};

use super::mutual_information::{InformationScore, InformationStrategy, PoolSource, RepeatPolicy};
use crate::errors::{ALError, Result};
use crate::math::{binary_entropy, norm_cdf, norm_pdf, norm_ppf, probit_mean};
use crate::models::Covariance;

const MAX_NOISE: f64 = 1e6;

/// Information carried by a Bernoulli outcome observed through a probit link.
///
/// The candidate's own information is the BALD term `h(E[p]) - E[h(p)]`, estimated from
/// `n_mc` draws of its latent. It is spread to each reference point in proportion to the
/// squared latent correlation, weighted by the reference's Bernoulli uncertainty `4 p (1 - p)`.
pub struct BernoulliInformation {
    pub n_mc: usize,
}

impl BernoulliInformation {
    fn expected_entropy(&self, mean: f64, sd: f64, rng: &mut StdRng) -> f64 {
        (0..self.n_mc)
            .map(|_| {
                let u: f64 = rng.gen();
                binary_entropy(norm_cdf(mean + sd * norm_ppf(u)))
            })
            .sum::<f64>()
            / self.n_mc as f64
    }
}

impl InformationScore for BernoulliInformation {
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
        let mu = mean[node];
        let bald = (binary_entropy(probit_mean(mu, var_c))
            - self.expected_entropy(mu, var_c.sqrt(), rng))
        .max(0.);

        let n = refs.len() as f64;
        let transfer = refs
            .map(|r| {
                let var_r = cov.variance(r);
                if !(var_r > 0.) {
                    return 0.;
                }
                let p_r = probit_mean(mean[r], var_r);
                let rho2 = (cov.get(node, r).powi(2) / (var_c * var_r)).min(1.);
                4. * p_r * (1. - p_r) * rho2
            })
            .sum::<f64>()
            / n;
        bald * transfer
    }

    fn observation_noise(&self, mean: &[f64], cov: &Covariance, node: usize) -> f64 {
        probit_observation_noise(mean, cov, node)
    }
}

/// Probit-linearised variance of a Bernoulli outcome: `p (1 - p) / phi(mu)^2`.
pub(crate) fn probit_observation_noise(mean: &[f64], cov: &Covariance, node: usize) -> f64 {
    let mu = mean[node];
    let p = probit_mean(mu, cov.variance(node));
    let slope = norm_pdf(mu).max(1e-6);
    (p * (1. - p) / (slope * slope)).clamp(1e-9, MAX_NOISE)
}

/// Bernoulli mutual information strategy, optionally allowing a candidate to be queried
/// several times in one batch.
pub type BernoulliStrategy = InformationStrategy<BernoulliInformation>;

impl BernoulliStrategy {
    pub fn new(
        n_test_points: usize,
        max_pool_subset: usize,
        n_mc: usize,
        seed: u64,
    ) -> Result<Self> {
        Self::bernoulli(
            "BernoulliPStrategy",
            n_test_points,
            max_pool_subset,
            n_mc,
            RepeatPolicy::SINGLE,
            seed,
        )
    }

    /// Each base candidate may be picked up to `n_max` times; repeats are jittered by up to
    /// `repeat_jitter` per coordinate.
    pub fn with_repeats(
        n_test_points: usize,
        max_pool_subset: usize,
        n_mc: usize,
        n_max: usize,
        repeat_jitter: f64,
        seed: u64,
    ) -> Result<Self> {
        const NAME: &str = "BernoulliPRepeatsStrategy";
        if n_max == 0 {
            return Err(ALError::config(NAME, "Nmax must be at least 1"));
        }
        if !(repeat_jitter >= 0.) || !repeat_jitter.is_finite() {
            return Err(ALError::config(
                NAME,
                format!(
                    "repeat_jitter must be a non-negative number, got {}",
                    repeat_jitter
                ),
            ));
        }
        Self::bernoulli(
            NAME,
            n_test_points,
            max_pool_subset,
            n_mc,
            RepeatPolicy {
                n_max,
                jitter: repeat_jitter,
            },
            seed,
        )
    }

    fn bernoulli(
        name: &'static str,
        n_test_points: usize,
        max_pool_subset: usize,
        n_mc: usize,
        repeats: RepeatPolicy,
        seed: u64,
    ) -> Result<Self> {
        if n_mc == 0 {
            return Err(ALError::config(name, "N_MC must be at least 1"));
        }
        Self::with_score(
            name,
            BernoulliInformation { n_mc },
            PoolSource::Uniform,
            n_test_points,
            Some(max_pool_subset),
            repeats,
            seed,
        )
    }
}
