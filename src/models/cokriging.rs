use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context};
use friedrich::{
    gaussian_process::{GaussianProcess, GaussianProcessBuilder},
    kernel::SquaredExp,
    prior::ConstantPrior,
};

use super::{BiFidelityModel, Covariance, LatentJoint};
use crate::library::TrainingData;
use crate::math::{norm_ppf, probit_mean, probit_variance};

const CONVERGENCE_FRACTION: f64 = 0.05;
const MAX_FIT_TIME: Duration = Duration::from_secs(3600);
const MAX_SCALE: f64 = 1e6;

type Gp = GaussianProcess<SquaredExp, ConstantPrior>;

/// Construction arguments read from `ALExperimentConfig::model_args`.
#[derive(Clone, Debug, PartialEq)]
pub struct CoKrigingArgs {
    pub noise: f64,
    pub cholesky_epsilon: f64,
    pub fit_kernel: bool,
    /// Labels are clipped to `[label_clip, 1 - label_clip]` before the probit transform.
    pub label_clip: f64,
}

impl Default for CoKrigingArgs {
    fn default() -> Self {
        Self {
            noise: 0.1,
            cholesky_epsilon: 0.01f64.powi(2),
            fit_kernel: true,
            label_clip: 0.05,
        }
    }
}

impl CoKrigingArgs {
    pub fn from_model_args(args: &BTreeMap<String, serde_json::Value>) -> anyhow::Result<Self> {
        let mut result = Self::default();
        for (key, value) in args {
            match key.as_str() {
                "noise" => result.noise = as_f64(key, value)?,
                "cholesky_epsilon" => result.cholesky_epsilon = as_f64(key, value)?,
                "label_clip" => result.label_clip = as_f64(key, value)?,
                "fit_kernel" => {
                    result.fit_kernel = value
                        .as_bool()
                        .with_context(|| format!("model arg {} must be a boolean", key))?
                }
                _ => log::warn!(
                    "Ignoring model arg {} not used by the co-kriging model",
                    key
                ),
            }
        }
        if !(result.noise > 0.) {
            bail!("model arg noise must be positive, got {}", result.noise);
        }
        if !(0. ..0.5).contains(&result.label_clip) {
            bail!("model arg label_clip must lie in [0, 0.5), got {}", result.label_clip);
        }
        Ok(result)
    }
}

fn as_f64(key: &str, value: &serde_json::Value) -> anyhow::Result<f64> {
    value
        .as_f64()
        .with_context(|| format!("model arg {} must be a number", key))
}

struct Trained {
    gp_l: Gp,
    gp_delta: Gp,
    rho: f64,
}

/// Autoregressive co-kriging classifier: `f_H(x) = rho * f_L(x) + delta(x)`.
///
/// Both latents are Gaussian processes regressed on probit-transformed labels,
/// so predictive probabilities are `Phi(mu / sqrt(1 + var))`.
pub struct CoKrigingModel {
    args: CoKrigingArgs,
    trained: Option<Trained>,
}

impl CoKrigingModel {
    pub fn new(args: CoKrigingArgs) -> Self {
        Self {
            args,
            trained: None,
        }
    }

    pub fn from_model_args(args: &BTreeMap<String, serde_json::Value>) -> anyhow::Result<Self> {
        Ok(Self::new(CoKrigingArgs::from_model_args(args)?))
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    pub fn rho(&self) -> Option<f64> {
        self.trained.as_ref().map(|t| t.rho)
    }

    fn latent_labels(&self, y: &[f64]) -> Vec<f64> {
        let clip = self.args.label_clip;
        y.iter()
            .map(|y| norm_ppf(y.clamp(clip, 1. - clip)))
            .collect()
    }

    fn fit_gp(&self, x: Vec<Vec<f64>>, z: Vec<f64>, n_epochs: usize) -> anyhow::Result<Gp> {
        let mut gp = GaussianProcessBuilder::<SquaredExp, ConstantPrior>::new(x, z)
            .set_noise(self.args.noise)
            .set_cholesky_epsilon(Some(self.args.cholesky_epsilon))
            .train();
        if self.args.fit_kernel && n_epochs > 0 {
            gp.fit_parameters(true, true, n_epochs, CONVERGENCE_FRACTION, MAX_FIT_TIME);
        }
        if gp.noise.is_nan() {
            bail!("gaussian process noise became NaN while fitting");
        }
        Ok(gp)
    }
}

/// Least-squares fit of `z ~ rho * m` by gradient descent.
fn fit_scale(m: &[f64], z: &[f64], lr: f64, n_epochs: usize) -> anyhow::Result<f64> {
    let n = m.len().max(1) as f64;
    let mut rho = 1.;
    for epoch in 0..n_epochs {
        let grad = m
            .iter()
            .zip(z)
            .map(|(m, z)| 2. * (rho * m - z) * m)
            .sum::<f64>()
            / n;
        rho -= lr * grad;
        if !rho.is_finite() || rho.abs() > MAX_SCALE {
            bail!(
                "fidelity scale diverged at epoch {} (rho = {}); the learning rate {} is too large",
                epoch,
                rho,
                lr
            );
        }
    }
    Ok(rho)
}

impl BiFidelityModel for CoKrigingModel {
    fn forward(&self, x: &[Vec<f64>]) -> Vec<f64> {
        self.predict_prob_mean(x)
    }

    fn evaluate_elpp(&self, x_test: &[Vec<f64>], y_test: &[f64]) -> f64 {
        if x_test.is_empty() {
            return 0.;
        }
        let p = self.forward(x_test);
        p.iter()
            .zip(y_test)
            .map(|(p, y)| {
                let p = p.clamp(1e-12, 1. - 1e-12);
                y * p.ln() + (1. - y) * (1. - p).ln()
            })
            .sum::<f64>()
            / x_test.len() as f64
    }

    fn train_model(&mut self, data: &TrainingData, lr: f64, n_epochs: usize) -> anyhow::Result<()> {
        if data.x_lf.is_empty() || data.x_hf.is_empty() {
            bail!(
                "co-kriging needs data at both fidelities (got {} LF and {} HF points)",
                data.x_lf.len(),
                data.x_hf.len()
            );
        }
        let z_l = self.latent_labels(&data.y_lf);
        let gp_l = self
            .fit_gp(data.x_lf.clone(), z_l, n_epochs)
            .context("fitting the low fidelity process")?;

        let z_h = self.latent_labels(&data.y_hf);
        let m_l = gp_l.predict(&data.x_hf);
        let rho = fit_scale(&m_l, &z_h, lr, n_epochs)?;
        let residuals = z_h
            .iter()
            .zip(m_l.iter())
            .map(|(z, m)| z - rho * m)
            .collect::<Vec<_>>();
        let gp_delta = self
            .fit_gp(data.x_hf.clone(), residuals, n_epochs)
            .context("fitting the high fidelity discrepancy")?;

        log::debug!(
            "Trained co-kriging model on {} LF / {} HF points, rho={:.4}",
            data.x_lf.len(),
            data.x_hf.len(),
            rho
        );
        self.trained = Some(Trained {
            gp_l,
            gp_delta,
            rho,
        });
        Ok(())
    }

    fn predict_f_h(&self, x: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
        let trained = match &self.trained {
            Some(t) if !x.is_empty() => t,
            _ => return (vec![0.; x.len()], vec![1.; x.len()]),
        };
        let x = x.to_vec();
        let (m_l, v_l) = trained.gp_l.predict_mean_variance(&x);
        let (m_d, v_d) = trained.gp_delta.predict_mean_variance(&x);
        let rho = trained.rho;
        let mean = m_l.iter().zip(&m_d).map(|(l, d)| rho * l + d).collect();
        let var = v_l
            .iter()
            .zip(&v_d)
            .map(|(l, d)| (rho * rho * l + d).max(0.))
            .collect();
        (mean, var)
    }

    fn predict_multi_fidelity_latent_joint(
        &self,
        x_l: &[Vec<f64>],
        x_h: &[Vec<f64>],
        x_prime: &[Vec<f64>],
    ) -> LatentJoint {
        let n_l = x_l.len();
        let n = n_l + x_h.len() + x_prime.len();
        let trained = match &self.trained {
            Some(t) if n > 0 => t,
            _ => {
                return LatentJoint {
                    mean: vec![0.; n],
                    covariance: Covariance::from_fn(n, |i, j| if i == j { 1. } else { 0. }),
                }
            }
        };
        let all: Vec<Vec<f64>> = x_l.iter().chain(x_h).chain(x_prime).cloned().collect();
        let high: Vec<Vec<f64>> = all[n_l..].to_vec();
        let rho = trained.rho;

        let m_l = trained.gp_l.predict(&all);
        let c_l = trained.gp_l.predict_covariance(&all);
        let (m_d, c_d) = if high.is_empty() {
            (Vec::new(), None)
        } else {
            (
                trained.gp_delta.predict(&high),
                Some(trained.gp_delta.predict_covariance(&high)),
            )
        };

        let mean = (0..n)
            .map(|i| {
                if i < n_l {
                    m_l[i]
                } else {
                    rho * m_l[i] + m_d[i - n_l]
                }
            })
            .collect();
        let covariance = Covariance::from_fn(n, |i, j| {
            // j <= i, so i is the high fidelity node whenever exactly one of them is.
            match (i < n_l, j < n_l) {
                (true, true) => c_l[(i, j)],
                (false, true) => rho * c_l[(i, j)],
                _ => {
                    let delta = c_d.as_ref().map(|c| c[(i - n_l, j - n_l)]).unwrap_or(0.);
                    rho * rho * c_l[(i, j)] + delta
                }
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
