use std::time::{Duration, Instant};

use ndarray::{Array1, Zip};
use rand::Rng;
use tracing::debug;

use crate::distributions::{MeanFieldPosterior, MixturePrior};
use crate::error::{PrsError, Result};
use crate::objective::{ElboObjective, Gradient};
use crate::types::OptimizerKind;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

#[derive(Debug, Clone, Copy)]
pub struct OptimSettings {
    pub kind: OptimizerKind,
    pub steps: usize,
    pub learning_rate: f64,
    pub max_duration: Option<Duration>,
}

impl Default for OptimSettings {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            steps: 500,
            learning_rate: 0.01,
            max_duration: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FitTrace {
    pub losses: Vec<f64>,
    pub steps: usize,
    pub budget_exhausted: bool,
}

impl FitTrace {
    pub fn final_loss(&self) -> Option<f64> {
        self.losses.last().copied()
    }
}

struct AdamState {
    m_mu: Array1<f64>,
    v_mu: Array1<f64>,
    m_rho: Array1<f64>,
    v_rho: Array1<f64>,
    t: i32,
}

impl AdamState {
    fn new(n: usize) -> Self {
        Self {
            m_mu: Array1::zeros(n),
            v_mu: Array1::zeros(n),
            m_rho: Array1::zeros(n),
            v_rho: Array1::zeros(n),
            t: 0,
        }
    }

    fn step(&mut self, posterior: &mut MeanFieldPosterior, grad: &Gradient, lr: f64) {
        self.t += 1;
        let bc1 = 1.0 - ADAM_BETA1.powi(self.t);
        let bc2 = 1.0 - ADAM_BETA2.powi(self.t);
        adam_update(&mut posterior.mu, &mut self.m_mu, &mut self.v_mu, &grad.mu, lr, bc1, bc2);
        adam_update(
            &mut posterior.rho,
            &mut self.m_rho,
            &mut self.v_rho,
            &grad.rho,
            lr,
            bc1,
            bc2,
        );
    }
}

fn adam_update(
    param: &mut Array1<f64>,
    m: &mut Array1<f64>,
    v: &mut Array1<f64>,
    grad: &Array1<f64>,
    lr: f64,
    bc1: f64,
    bc2: f64,
) {
    Zip::from(param)
        .and(m)
        .and(v)
        .and(grad)
        .for_each(|p, m, v, &g| {
            *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
            *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
            let m_hat = *m / bc1;
            let v_hat = *v / bc2;
            *p -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
        });
}

fn sgd_update(posterior: &mut MeanFieldPosterior, grad: &Gradient, lr: f64) {
    posterior.mu.scaled_add(-lr, &grad.mu);
    posterior.rho.scaled_add(-lr, &grad.rho);
}

pub fn fit<R: Rng + ?Sized>(
    objective: &ElboObjective<'_>,
    prior: &MixturePrior,
    posterior: &mut MeanFieldPosterior,
    settings: &OptimSettings,
    rng: &mut R,
) -> Result<FitTrace> {
    if !settings.learning_rate.is_finite() || settings.learning_rate <= 0.0 {
        return Err(PrsError::InvalidArgument(format!(
            "learning rate must be positive, got {}",
            settings.learning_rate
        )));
    }
    if posterior.len() != objective.n_snps() || prior.len() != objective.n_snps() {
        return Err(PrsError::InvalidArgument(format!(
            "posterior ({}) and prior ({}) must match the objective's {} SNPs",
            posterior.len(),
            prior.len(),
            objective.n_snps()
        )));
    }

    let started = Instant::now();
    let mut adam = match settings.kind {
        OptimizerKind::Adam => Some(AdamState::new(posterior.len())),
        OptimizerKind::Sgd => None,
    };
    let mut losses = Vec::with_capacity(settings.steps);
    let mut budget_exhausted = false;

    for step in 0..settings.steps {
        if let Some(limit) = settings.max_duration
            && started.elapsed() >= limit
        {
            budget_exhausted = true;
            debug!("fit stopped after {step} steps: time budget of {limit:?} reached");
            break;
        }

        let (terms, grad) = objective.loss_and_grad(posterior, prior, rng);
        if !terms.total.is_finite() || !grad.is_finite() {
            return Err(PrsError::Diverged {
                step,
                loss: terms.total,
            });
        }
        losses.push(terms.total);

        match adam.as_mut() {
            Some(state) => state.step(posterior, &grad, settings.learning_rate),
            None => sgd_update(posterior, &grad, settings.learning_rate),
        }

        if posterior
            .mu
            .iter()
            .chain(posterior.rho.iter())
            .any(|v| !v.is_finite())
        {
            return Err(PrsError::Diverged {
                step,
                loss: terms.total,
            });
        }

        if step % 100 == 0 {
            debug!(
                "step {step}: loss {:.6} (data fit {:.6}, kl {:.6})",
                terms.total, terms.data_fit, terms.kl
            );
        }
    }

    Ok(FitTrace {
        steps: losses.len(),
        losses,
        budget_exhausted,
    })
}
