use statrs::function::erf::{erf, erf_inv};

const SQRT_2: f64 = std::f64::consts::SQRT_2;
const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Standard normal CDF.
#[inline]
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * (1. + erf(x / SQRT_2))
}

#[inline]
pub fn norm_pdf(x: f64) -> f64 {
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Inverse of the standard normal CDF. `p` is clipped to the open unit interval.
pub fn norm_ppf(p: f64) -> f64 {
    let p = p.clamp(1e-12, 1. - 1e-12);
    SQRT_2 * erf_inv(2. * p - 1.)
}

/// Probit link integrated over a Gaussian latent `N(mean, var)`.
#[inline]
pub fn probit_mean(mean: f64, var: f64) -> f64 {
    norm_cdf(mean / (1. + var.max(0.)).sqrt())
}

/// Delta-method variance of `Phi(f)` for `f ~ N(mean, var)`.
pub fn probit_variance(mean: f64, var: f64) -> f64 {
    let var = var.max(0.);
    let scaled = mean / (1. + var).sqrt();
    norm_pdf(scaled).powi(2) * var / (1. + var)
}

/// Entropy of a Bernoulli variable in nats.
pub fn binary_entropy(p: f64) -> f64 {
    if p <= 0. || p >= 1. {
        return 0.;
    }
    -p * p.ln() - (1. - p) * (1. - p).ln()
}
