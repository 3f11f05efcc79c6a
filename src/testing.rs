//! Fixtures shared by the unit tests: a toy bi-fidelity problem and a fast analytic model.

use std::sync::Mutex;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::dataset::BiFidelityDataset;
use crate::library::{Sample, TrainingData};
use crate::math::{norm_cdf, probit_mean, probit_variance};
use crate::models::{BiFidelityModel, Covariance, LatentJoint};

/// 1.0 where the first coordinate exceeds `threshold`, else 0.0.
pub fn step_labels(x: &[Vec<f64>], threshold: f64) -> Vec<f64> {
    x.iter()
        .map(|p| if p[0] > threshold { 1. } else { 0. })
        .collect()
}

fn linear_probability(x: &[Vec<f64>], shift: f64) -> Vec<f64> {
    x.iter()
        .map(|p| norm_cdf(4. * (p.iter().sum::<f64>() - 1. + shift)))
        .collect()
}

fn bernoulli_sampler(
    shift: f64,
    rng: Mutex<StdRng>,
) -> impl Fn(&[Vec<f64>], usize) -> Sample {
    move |x: &[Vec<f64>], reps: usize| {
        let probs = linear_probability(x, shift);
        let mut rng = rng.lock().unwrap();
        let repeats: Vec<Vec<f64>> = (0..reps)
            .map(|_| {
                probs
                    .iter()
                    .map(|p| if rng.gen_bool(*p) { 1. } else { 0. })
                    .collect()
            })
            .collect();
        Sample::from_repeats(&repeats).with_probs(probs)
    }
}

/// Smooth linear decision boundary; the low fidelity boundary is shifted by 0.1.
pub fn toy_linear_dataset(c_lf: f64, c_hf: f64, seed: u64) -> BiFidelityDataset {
    BiFidelityDataset::new(
        "ToyLinear",
        bernoulli_sampler(0.1, Mutex::new(StdRng::seed_from_u64(seed))),
        bernoulli_sampler(0., Mutex::new(StdRng::seed_from_u64(seed.wrapping_add(1)))),
        c_lf,
        c_hf,
    )
    .unwrap()
    .with_true_probabilities(
        |x: &[Vec<f64>]| linear_probability(x, 0.1),
        |x: &[Vec<f64>]| linear_probability(x, 0.),
    )
}

/// Prior-only model with a squared exponential kernel: `f_H = f_L + delta`.
///
/// Training only counts calls, unless `fail_on_train` is set.
pub struct StubModel {
    pub lengthscale: f64,
    pub fail_on_train: bool,
    pub trained: usize,
    pub last_training_sizes: (usize, usize),
}

impl Default for StubModel {
    fn default() -> Self {
        Self::with_lengthscale(0.3)
    }
}

impl StubModel {
    pub fn with_lengthscale(lengthscale: f64) -> Self {
        Self {
            lengthscale,
            fail_on_train: false,
            trained: 0,
            last_training_sizes: (0, 0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_on_train: true,
            ..Self::default()
        }
    }

    fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        let d2: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
        (-d2 / (2. * self.lengthscale.powi(2))).exp()
    }

    fn latent_mean(x: &[f64]) -> f64 {
        2. * (x.iter().sum::<f64>() - 1.)
    }
}

impl BiFidelityModel for StubModel {
    fn forward(&self, x: &[Vec<f64>]) -> Vec<f64> {
        self.predict_prob_mean(x)
    }

    fn evaluate_elpp(&self, x_test: &[Vec<f64>], y_test: &[f64]) -> f64 {
        let p = self.forward(x_test);
        p.iter()
            .zip(y_test)
            .map(|(p, y)| y * p.ln() + (1. - y) * (1. - p).ln())
            .sum::<f64>()
            / x_test.len().max(1) as f64
    }

    fn train_model(
        &mut self,
        data: &TrainingData,
        _lr: f64,
        _n_epochs: usize,
    ) -> anyhow::Result<()> {
        if self.fail_on_train {
            anyhow::bail!("loss became NaN");
        }
        self.trained += 1;
        self.last_training_sizes = (data.x_lf.len(), data.x_hf.len());
        Ok(())
    }

    fn predict_f_h(&self, x: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
        (
            x.iter().map(|p| Self::latent_mean(p)).collect(),
            vec![1.25; x.len()],
        )
    }

    fn predict_multi_fidelity_latent_joint(
        &self,
        x_l: &[Vec<f64>],
        x_h: &[Vec<f64>],
        x_prime: &[Vec<f64>],
    ) -> LatentJoint {
        let n_l = x_l.len();
        let all: Vec<&Vec<f64>> = x_l.iter().chain(x_h).chain(x_prime).collect();
        let mean = all.iter().map(|p| Self::latent_mean(p)).collect();
        let covariance = Covariance::from_fn(all.len(), |i, j| {
            let k = self.kernel(all[i], all[j]);
            if i >= n_l && j >= n_l {
                1.25 * k
            } else {
                k
            }
        });
        LatentJoint { mean, covariance }
    }

    fn predict_prob_mean(&self, x: &[Vec<f64>]) -> Vec<f64> {
        let (mean, var) = self.predict_f_h(x);
        mean.iter()
            .zip(&var)
            .map(|(m, v)| probit_mean(*m, *v))
            .collect()
    }

    fn predict_prob_var(&self, x: &[Vec<f64>]) -> Vec<f64> {
        let (mean, var) = self.predict_f_h(x);
        mean.iter()
            .zip(&var)
            .map(|(m, v)| probit_variance(*m, *v))
            .collect()
    }
}
