pub mod cokriging;

use crate::library::TrainingData;

/// Capabilities the experiment loop and the acquisition strategies need from a
/// bi-fidelity probabilistic classifier.
///
/// All inputs are normalized points. Latent outputs live on the probit scale.
pub trait BiFidelityModel {
    /// Predictive probability `P(y_H = 1 | x)`.
    fn forward(&self, x: &[Vec<f64>]) -> Vec<f64>;

    /// Mean expected log predictive probability of held-out high fidelity outcomes.
    fn evaluate_elpp(&self, x_test: &[Vec<f64>], y_test: &[f64]) -> f64;

    /// Refits the model on everything in `data`. Deterministic for a fixed input.
    fn train_model(&mut self, data: &TrainingData, lr: f64, n_epochs: usize) -> anyhow::Result<()>;

    /// Mean and variance of the high fidelity latent.
    fn predict_f_h(&self, x: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>);

    /// Joint latent distribution over LF latents at `x_l`, HF latents at `x_h`
    /// and HF latents at `x_prime`, in that order.
    fn predict_multi_fidelity_latent_joint(
        &self,
        x_l: &[Vec<f64>],
        x_h: &[Vec<f64>],
        x_prime: &[Vec<f64>],
    ) -> LatentJoint;

    fn predict_prob_mean(&self, x: &[Vec<f64>]) -> Vec<f64>;

    fn predict_prob_var(&self, x: &[Vec<f64>]) -> Vec<f64>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct LatentJoint {
    pub mean: Vec<f64>,
    pub covariance: Covariance,
}

/// Dense symmetric covariance matrix stored row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Covariance {
    n: usize,
    values: Vec<f64>,
}

impl Covariance {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            values: vec![0.; n * n],
        }
    }

    pub fn from_fn(n: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut cov = Self::zeros(n);
        for i in 0..n {
            for j in 0..=i {
                let v = f(i, j);
                cov.set(i, j, v);
            }
        }
        cov
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }

    /// Sets both `(i, j)` and `(j, i)`.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.values[i * self.n + j] = value;
        self.values[j * self.n + i] = value;
    }

    pub fn variance(&self, i: usize) -> f64 {
        self.get(i, i)
    }

    /// Posterior covariance after a noisy observation of `node`:
    /// `S <- S - S[:, node] S[node, :] / (S[node, node] + noise)`.
    pub fn condition_on(&mut self, node: usize, noise: f64) {
        let denom = self.get(node, node) + noise;
        if !(denom > 0.) {
            return;
        }
        let column: Vec<f64> = (0..self.n).map(|i| self.get(i, node)).collect();
        for i in 0..self.n {
            for j in 0..=i {
                let updated = self.get(i, j) - column[i] * column[j] / denom;
                self.set(i, j, updated);
            }
        }
        for i in 0..self.n {
            if self.get(i, i) < 0. {
                self.set(i, i, 0.);
            }
        }
    }
}
