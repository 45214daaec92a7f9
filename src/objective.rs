use ndarray::{Array1, Array2, Zip};
use rand::Rng;

use crate::distributions::{
    MeanFieldPosterior, MixturePrior, normal_log_density, sigmoid, standard_normal_draws,
};
use crate::error::{PrsError, Result};
use crate::matrix::ensure_square;

pub const DEFAULT_MC_SAMPLES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossTerms {
    pub data_fit: f64,
    pub kl: f64,
    pub total: f64,
}

#[derive(Debug, Clone)]
pub struct Gradient {
    pub mu: Array1<f64>,
    pub rho: Array1<f64>,
}

impl Gradient {
    pub fn is_finite(&self) -> bool {
        self.mu.iter().chain(self.rho.iter()).all(|v| v.is_finite())
    }
}

// loss = mean((R b0 - z)^2) + kl_weight / N * mean_k[log q(b_k) - log p(b_k)]
// with b0 and b_k reparameterized draws mu + softplus(rho) * eps.
#[derive(Debug, Clone)]
pub struct ElboObjective<'a> {
    ld: &'a Array2<f64>,
    z: &'a Array1<f64>,
    n_mc_samples: usize,
    kl_weight: f64,
}

impl<'a> ElboObjective<'a> {
    pub fn new(
        ld: &'a Array2<f64>,
        z: &'a Array1<f64>,
        n_mc_samples: usize,
        kl_weight: Option<f64>,
    ) -> Result<Self> {
        ensure_square(ld, "LD matrix")?;
        if ld.nrows() != z.len() {
            return Err(PrsError::InvalidArgument(format!(
                "LD matrix is {n} x {n} but {} effects were given",
                z.len(),
                n = ld.nrows()
            )));
        }
        if z.iter().any(|v| !v.is_finite()) {
            return Err(PrsError::InvalidArgument(
                "observed effects must be finite".to_string(),
            ));
        }
        if n_mc_samples == 0 {
            return Err(PrsError::InvalidArgument(
                "at least one Monte Carlo sample is required".to_string(),
            ));
        }
        let n = z.len() as f64;
        let kl_weight = kl_weight.unwrap_or(1.0 / n);
        if !kl_weight.is_finite() || kl_weight < 0.0 {
            return Err(PrsError::InvalidArgument(format!(
                "kl_weight must be finite and non-negative, got {kl_weight}"
            )));
        }
        Ok(Self {
            ld,
            z,
            n_mc_samples,
            kl_weight,
        })
    }

    pub fn n_snps(&self) -> usize {
        self.z.len()
    }

    pub fn kl_scale(&self) -> f64 {
        self.kl_weight / self.n_snps() as f64
    }

    fn residual(&self, beta: &Array1<f64>) -> Array1<f64> {
        self.ld.dot(beta) - self.z
    }

    pub fn expected_data_fit(&self, beta: &Array1<f64>) -> f64 {
        let resid = self.residual(beta);
        resid.dot(&resid) / self.n_snps() as f64
    }

    pub fn loss<R: Rng + ?Sized>(
        &self,
        posterior: &MeanFieldPosterior,
        prior: &MixturePrior,
        rng: &mut R,
    ) -> LossTerms {
        self.evaluate(posterior, prior, rng, false).0
    }

    pub fn loss_and_grad<R: Rng + ?Sized>(
        &self,
        posterior: &MeanFieldPosterior,
        prior: &MixturePrior,
        rng: &mut R,
    ) -> (LossTerms, Gradient) {
        let (terms, grad) = self.evaluate(posterior, prior, rng, true);
        let n = self.n_snps();
        (
            terms,
            grad.unwrap_or_else(|| Gradient {
                mu: Array1::zeros(n),
                rho: Array1::zeros(n),
            }),
        )
    }

    fn evaluate<R: Rng + ?Sized>(
        &self,
        posterior: &MeanFieldPosterior,
        prior: &MixturePrior,
        rng: &mut R,
        with_grad: bool,
    ) -> (LossTerms, Option<Gradient>) {
        let n = self.n_snps();
        let nf = n as f64;
        let sigma = posterior.sigma();

        let eps0 = standard_normal_draws(n, rng);
        let beta0 = posterior.reparameterize(&sigma, &eps0);
        let resid = self.residual(&beta0);
        let data_fit = resid.dot(&resid) / nf;

        let mut grad_mu = Array1::<f64>::zeros(n);
        let mut grad_sigma = Array1::<f64>::zeros(n);
        if with_grad {
            let g_beta = self.ld.t().dot(&resid) * (2.0 / nf);
            grad_sigma = &g_beta * &eps0;
            grad_mu = g_beta;
        }

        let scale = self.kl_scale();
        let k = self.n_mc_samples as f64;
        let mut kl_sum = 0.0;
        for _ in 0..self.n_mc_samples {
            let eps = standard_normal_draws(n, rng);
            let beta = posterior.reparameterize(&sigma, &eps);

            let log_q: f64 = Zip::from(&sigma)
                .and(&eps)
                .fold(0.0, |acc, &s, &e| acc + normal_log_density(e * s, s));
            let log_p = prior.log_prob(beta.view());
            kl_sum += log_q - log_p;

            if with_grad {
                Zip::from(&mut grad_mu)
                    .and(&mut grad_sigma)
                    .and(&beta)
                    .and(&eps)
                    .and(&sigma)
                    .for_each(|gm, gs, &b, &e, &s| {
                        let dlogp = prior.grad_log_prob_coord(b);
                        *gm -= scale * dlogp / k;
                        *gs += scale * (-1.0 / s - dlogp * e) / k;
                    });
            }
        }
        let kl = kl_sum / k;

        let terms = LossTerms {
            data_fit,
            kl,
            total: data_fit + scale * kl,
        };
        if !with_grad {
            return (terms, None);
        }

        let grad_rho = Zip::from(&grad_sigma)
            .and(&posterior.rho)
            .map_collect(|&gs, &r| gs * sigmoid(r));
        (
            terms,
            Some(Gradient {
                mu: grad_mu,
                rho: grad_rho,
            }),
        )
    }
}
