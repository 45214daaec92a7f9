use std::time::Duration;

use bbviprs::distributions::{
    MeanFieldPosterior, MixturePrior, normal_log_density, softplus, softplus_inverse,
};
use bbviprs::error::PrsError;
use bbviprs::infinitesimal::infinitesimal_init;
use bbviprs::objective::ElboObjective;
use bbviprs::optim::{OptimSettings, fit};
use bbviprs::types::OptimizerKind;
use ndarray::{Array1, array};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn small_problem() -> (ndarray::Array2<f64>, Array1<f64>) {
    let ld = array![[1.0, 0.4, -0.2], [0.4, 1.0, 0.1], [-0.2, 0.1, 1.0]];
    let z = array![1.5, 0.3, -0.8];
    (ld, z)
}

#[test]
fn softplus_is_strictly_positive() {
    for x in [-1.0e6, -745.0, -50.0, -1.0, 0.0, 1.0, 50.0, 1.0e6] {
        let y = softplus(x);
        assert!(y > 0.0, "softplus({x}) = {y}");
        assert!(y.is_finite());
    }
    let posterior = MeanFieldPosterior {
        mu: Array1::zeros(3),
        rho: array![-1.0e4, -30.0, 5.0],
    };
    assert!(posterior.sigma().iter().all(|&s| s > 0.0));
}

#[test]
fn softplus_inverse_round_trip() {
    for x in [-5.0, 0.5, 3.0] {
        assert!((softplus_inverse(softplus(x)) - x).abs() < 1e-10);
    }
}

#[test]
fn posterior_starts_at_unit_scale() {
    let init = array![0.1, -0.2];
    let posterior = MeanFieldPosterior::new(2, Some(&init)).expect("posterior");
    assert_eq!(posterior.mu, init);
    for s in posterior.sigma() {
        assert!((s - 1.0).abs() < 1e-12);
    }
    assert!(MeanFieldPosterior::new(3, Some(&init)).is_err());
}

#[test]
fn prior_rejects_invalid_hyperparameters() {
    assert!(MixturePrior::new(3, 0.0, 0.1, 0.5).is_err());
    assert!(MixturePrior::new(3, 1.0, -0.1, 0.5).is_err());
    assert!(MixturePrior::new(3, 1.0, 0.1, 1.5).is_err());
    assert!(MixturePrior::new(0, 1.0, 0.1, 0.5).is_err());
}

#[test]
fn single_component_prior_is_gaussian() {
    let prior = MixturePrior::new(1, 0.7, 0.01, 1.0).expect("prior");
    for b in [-1.0, 0.0, 0.3] {
        assert!((prior.log_prob_coord(b) - normal_log_density(b, 0.7)).abs() < 1e-12);
    }
}

#[test]
fn prior_gradient_matches_finite_difference() {
    let prior = MixturePrior::new(1, 1.0, 0.05, 0.3).expect("prior");
    let h = 1e-6;
    for b in [-0.5, 0.02, 0.3, 2.0] {
        let numeric = (prior.log_prob_coord(b + h) - prior.log_prob_coord(b - h)) / (2.0 * h);
        let analytic = prior.grad_log_prob_coord(b);
        assert!(
            (numeric - analytic).abs() < 1e-4 * (1.0 + analytic.abs()),
            "b = {b}: numeric {numeric}, analytic {analytic}"
        );
    }
}

#[test]
fn objective_gradient_matches_finite_difference() {
    let (ld, z) = small_problem();
    let objective = ElboObjective::new(&ld, &z, 5, Some(1.0)).expect("objective");
    let prior = MixturePrior::new(3, 1.0, 0.1, 0.4).expect("prior");
    let posterior = MeanFieldPosterior {
        mu: array![0.4, -0.1, 0.2],
        rho: array![-0.5, 0.2, 0.0],
    };

    // The same seed reuses the same standard normal draws, so the loss is a
    // smooth function of the parameters.
    let loss_at = |p: &MeanFieldPosterior| {
        let mut rng = StdRng::seed_from_u64(11);
        objective.loss(p, &prior, &mut rng).total
    };
    let mut rng = StdRng::seed_from_u64(11);
    let (_, grad) = objective.loss_and_grad(&posterior, &prior, &mut rng);

    let h = 1e-6;
    for j in 0..3 {
        let mut plus = posterior.clone();
        let mut minus = posterior.clone();
        plus.mu[j] += h;
        minus.mu[j] -= h;
        let numeric = (loss_at(&plus) - loss_at(&minus)) / (2.0 * h);
        assert!(
            (numeric - grad.mu[j]).abs() < 1e-5 * (1.0 + numeric.abs()),
            "mu[{j}]: numeric {numeric}, analytic {}",
            grad.mu[j]
        );

        let mut plus = posterior.clone();
        let mut minus = posterior.clone();
        plus.rho[j] += h;
        minus.rho[j] -= h;
        let numeric = (loss_at(&plus) - loss_at(&minus)) / (2.0 * h);
        assert!(
            (numeric - grad.rho[j]).abs() < 1e-5 * (1.0 + numeric.abs()),
            "rho[{j}]: numeric {numeric}, analytic {}",
            grad.rho[j]
        );
    }
}

#[test]
fn loss_terms_add_up() {
    let (ld, z) = small_problem();
    let objective = ElboObjective::new(&ld, &z, 50, None).expect("objective");
    // Default KL weight 1/N, applied again per SNP.
    assert!((objective.kl_scale() - 1.0 / 9.0).abs() < 1e-15);
    let prior = MixturePrior::new(3, 1.0, 0.1, 0.4).expect("prior");
    let posterior = MeanFieldPosterior::new(3, None).expect("posterior");
    let mut rng = StdRng::seed_from_u64(3);
    let terms = objective.loss(&posterior, &prior, &mut rng);
    assert!(terms.data_fit >= 0.0);
    assert!((terms.total - (terms.data_fit + objective.kl_scale() * terms.kl)).abs() < 1e-12);
    let exact = objective.expected_data_fit(&Array1::zeros(3));
    assert!((exact - z.dot(&z) / 3.0).abs() < 1e-12);
}

#[test]
fn objective_rejects_mismatched_shapes() {
    let (ld, _) = small_problem();
    let z = array![1.0, 2.0];
    assert!(matches!(
        ElboObjective::new(&ld, &z, 10, None),
        Err(PrsError::InvalidArgument(_))
    ));
}

#[test]
fn same_seed_same_trace() {
    let (ld, z) = small_problem();
    let objective = ElboObjective::new(&ld, &z, 20, None).expect("objective");
    let prior = MixturePrior::new(3, 1.0, 0.05, 0.2).expect("prior");
    let settings = OptimSettings {
        steps: 100,
        ..OptimSettings::default()
    };

    let run = |seed: u64| {
        let mut posterior = MeanFieldPosterior::new(3, None).expect("posterior");
        let mut rng = StdRng::seed_from_u64(seed);
        let trace = fit(&objective, &prior, &mut posterior, &settings, &mut rng).expect("fit");
        (trace.losses, posterior.mu)
    };
    let (first, mu_first) = run(5);
    let (second, mu_second) = run(5);
    let (other, _) = run(6);
    assert_eq!(first.len(), 100);
    assert_eq!(first, second);
    assert_eq!(mu_first, mu_second);
    assert_ne!(first, other);
}

#[test]
fn adam_reduces_the_loss() {
    let (ld, z) = small_problem();
    let objective = ElboObjective::new(&ld, &z, 20, None).expect("objective");
    let prior = MixturePrior::new(3, 1.0, 0.05, 0.5).expect("prior");
    let mut posterior = MeanFieldPosterior::new(3, None).expect("posterior");
    let mut rng = StdRng::seed_from_u64(1);
    let settings = OptimSettings {
        steps: 400,
        learning_rate: 0.02,
        ..OptimSettings::default()
    };
    let trace = fit(&objective, &prior, &mut posterior, &settings, &mut rng).expect("fit");
    let head: f64 = trace.losses[..20].iter().sum::<f64>() / 20.0;
    let tail: f64 = trace.losses[trace.losses.len() - 20..].iter().sum::<f64>() / 20.0;
    assert!(tail < head, "loss went from {head} to {tail}");
}

#[test]
fn sgd_with_huge_step_diverges() {
    let (ld, z) = small_problem();
    let objective = ElboObjective::new(&ld, &z, 10, None).expect("objective");
    let prior = MixturePrior::new(3, 0.001, 0.001, 0.5).expect("prior");
    let mut posterior = MeanFieldPosterior::new(3, None).expect("posterior");
    let mut rng = StdRng::seed_from_u64(2);
    let settings = OptimSettings {
        kind: OptimizerKind::Sgd,
        steps: 500,
        learning_rate: 1.0,
        max_duration: None,
    };
    let err = fit(&objective, &prior, &mut posterior, &settings, &mut rng).expect_err("diverges");
    assert!(matches!(err, PrsError::Diverged { .. }));
}

#[test]
fn zero_time_budget_stops_immediately() {
    let (ld, z) = small_problem();
    let objective = ElboObjective::new(&ld, &z, 10, None).expect("objective");
    let prior = MixturePrior::new(3, 1.0, 0.1, 0.5).expect("prior");
    let mut posterior = MeanFieldPosterior::new(3, None).expect("posterior");
    let mut rng = StdRng::seed_from_u64(4);
    let settings = OptimSettings {
        max_duration: Some(Duration::ZERO),
        ..OptimSettings::default()
    };
    let trace = fit(&objective, &prior, &mut posterior, &settings, &mut rng).expect("fit");
    assert!(trace.budget_exhausted);
    assert_eq!(trace.steps, 0);
    assert!(trace.final_loss().is_none());
}

#[test]
fn infinitesimal_init_on_identity_ld() {
    let ld = ndarray::Array2::<f64>::eye(4);
    let z = array![2.0, -1.0, 0.5, 0.0];
    let init = infinitesimal_init(&ld, &z, 100.0, 0.5).expect("init");
    // M / (N h2) = 4 / 50
    let shrink = 1.0 + 4.0 / 50.0;
    for (got, want) in init.iter().zip(z.iter()) {
        assert!((got - want / shrink).abs() < 1e-12);
    }
}

#[test]
fn infinitesimal_init_reports_indefinite_system() {
    let ld = array![[1.0, 2.0], [2.0, 1.0]];
    let z = array![1.0, 1.0];
    let err = infinitesimal_init(&ld, &z, 1.0e6, 1.0).expect_err("not positive definite");
    assert!(matches!(err, PrsError::SingularMatrix(_)));
}

#[test]
fn posterior_samples_and_density() {
    let posterior = MeanFieldPosterior {
        mu: array![0.5, -1.0],
        rho: array![softplus_inverse(0.1), softplus_inverse(2.0)],
    };
    let mut rng = StdRng::seed_from_u64(8);
    let draws: Vec<Array1<f64>> = (0..4000).map(|_| posterior.sample(&mut rng)).collect();
    let mean0 = draws.iter().map(|d| d[0]).sum::<f64>() / draws.len() as f64;
    let mean1 = draws.iter().map(|d| d[1]).sum::<f64>() / draws.len() as f64;
    assert!((mean0 - 0.5).abs() < 0.01, "mean0 = {mean0}");
    assert!((mean1 + 1.0).abs() < 0.15, "mean1 = {mean1}");

    let at_mean = posterior.log_prob(posterior.mu.view());
    let expected = normal_log_density(0.0, 0.1) + normal_log_density(0.0, 2.0);
    assert!((at_mean - expected).abs() < 1e-12);
    let off = posterior.log_prob(array![0.6, -1.0].view());
    assert!(off < at_mean);
}

#[test]
fn infinitesimal_init_rejects_collinear_snps() {
    // Perfect LD and negligible shrinkage leave a vanishing pivot.
    let ld = array![[1.0, 1.0], [1.0, 1.0]];
    let z = array![1.0, 1.0];
    let err = infinitesimal_init(&ld, &z, 1.0e12, 1.0).expect_err("collinear");
    assert!(matches!(err, PrsError::SingularMatrix(_)));
}
