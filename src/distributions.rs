use ndarray::{Array1, ArrayView1};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{PrsError, Result};

pub const INITIAL_POSTERIOR_SCALE: f64 = 1.0;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

// Floored at MIN_POSITIVE so sigma never collapses to 0.
pub fn softplus(x: f64) -> f64 {
    let y = x.max(0.0) + (-x.abs()).exp().ln_1p();
    y.max(f64::MIN_POSITIVE)
}

pub fn softplus_inverse(y: f64) -> f64 {
    y + (-(-y).exp_m1()).ln()
}

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

pub fn normal_log_density(x: f64, sd: f64) -> f64 {
    let u = x / sd;
    -LN_SQRT_2PI - sd.ln() - 0.5 * u * u
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    let m = a.max(b);
    if m == f64::NEG_INFINITY {
        return m;
    }
    m + ((a - m).exp() + (b - m).exp()).ln()
}

pub fn standard_normal_draws<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Array1<f64> {
    Array1::from_shape_fn(n, |_| -> f64 { StandardNormal.sample(&mut *rng) })
}

#[derive(Debug, Clone)]
pub struct MixturePrior {
    n: usize,
    scale1: f64,
    scale2: f64,
    log_w1: f64,
    log_w2: f64,
}

impl MixturePrior {
    pub fn new(n: usize, scale1: f64, scale2: f64, mixture_prob: f64) -> Result<Self> {
        if n == 0 {
            return Err(PrsError::InvalidArgument(
                "prior needs at least one SNP".to_string(),
            ));
        }
        for (value, name) in [(scale1, "scale1"), (scale2, "scale2")] {
            if !value.is_finite() || value <= 0.0 {
                return Err(PrsError::InvalidArgument(format!(
                    "{name} must be finite and positive, got {value}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&mixture_prob) {
            return Err(PrsError::InvalidArgument(format!(
                "mixture_prob must lie in [0, 1], got {mixture_prob}"
            )));
        }
        Ok(Self {
            n,
            scale1,
            scale2,
            log_w1: mixture_prob.ln(),
            log_w2: (1.0 - mixture_prob).ln(),
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    fn component_log_densities(&self, beta: f64) -> (f64, f64) {
        (
            self.log_w1 + normal_log_density(beta, self.scale1),
            self.log_w2 + normal_log_density(beta, self.scale2),
        )
    }

    pub fn log_prob_coord(&self, beta: f64) -> f64 {
        let (l1, l2) = self.component_log_densities(beta);
        log_sum_exp(l1, l2)
    }

    pub fn grad_log_prob_coord(&self, beta: f64) -> f64 {
        let (l1, l2) = self.component_log_densities(beta);
        let total = log_sum_exp(l1, l2);
        let r1 = (l1 - total).exp();
        let r2 = (l2 - total).exp();
        -beta * (r1 / (self.scale1 * self.scale1) + r2 / (self.scale2 * self.scale2))
    }

    pub fn log_prob(&self, beta: ArrayView1<f64>) -> f64 {
        beta.iter().map(|&b| self.log_prob_coord(b)).sum()
    }
}

#[derive(Debug, Clone)]
pub struct MeanFieldPosterior {
    pub mu: Array1<f64>,
    pub rho: Array1<f64>,
}

impl MeanFieldPosterior {
    pub fn new(n: usize, init: Option<&Array1<f64>>) -> Result<Self> {
        let mu = match init {
            Some(values) => {
                if values.len() != n {
                    return Err(PrsError::InvalidArgument(format!(
                        "initial means have length {}, expected {n}",
                        values.len()
                    )));
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(PrsError::InvalidArgument(
                        "initial means must be finite".to_string(),
                    ));
                }
                values.clone()
            }
            None => Array1::zeros(n),
        };
        let rho = Array1::from_elem(n, softplus_inverse(INITIAL_POSTERIOR_SCALE));
        Ok(Self { mu, rho })
    }

    pub fn len(&self) -> usize {
        self.mu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mu.is_empty()
    }

    pub fn sigma(&self) -> Array1<f64> {
        self.rho.mapv(softplus)
    }

    pub fn reparameterize(&self, sigma: &Array1<f64>, eps: &Array1<f64>) -> Array1<f64> {
        &self.mu + &(sigma * eps)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        let eps = standard_normal_draws(self.len(), rng);
        self.reparameterize(&self.sigma(), &eps)
    }

    pub fn log_prob(&self, beta: ArrayView1<f64>) -> f64 {
        beta.iter()
            .zip(self.mu.iter())
            .zip(self.rho.iter())
            .map(|((&b, &m), &r)| normal_log_density(b - m, softplus(r)))
            .sum()
    }
}
