use bbviprs::infinitesimal::infinitesimal_init;
use bbviprs::matrix::{ld_matrix, standardize_columns};
use bbviprs::sweep::{
    FitOutcome, GridPoint, SweepConfig, SweepGrid, SweepInputs, fit_point, fit_with_seed, sweep,
};
use bbviprs::types::OptimizerKind;
use ndarray::{Array1, Array2, array};

/// 10 samples x 5 SNPs; SNP 0 carries the only non-zero effect.
struct Toy {
    x: Array2<f64>,
    ld: Array2<f64>,
    z: Array1<f64>,
    phenotype: Array1<f64>,
    init: Array1<f64>,
}

fn toy() -> Toy {
    let dosages = array![
        [0.0, 0.0, 2.0, 0.0, 1.0],
        [1.0, 1.0, 1.0, 2.0, 0.0],
        [2.0, 2.0, 0.0, 1.0, 1.0],
        [0.0, 1.0, 1.0, 0.0, 2.0],
        [1.0, 1.0, 2.0, 1.0, 0.0],
        [2.0, 1.0, 0.0, 2.0, 1.0],
        [0.0, 0.0, 1.0, 1.0, 2.0],
        [1.0, 2.0, 0.0, 0.0, 1.0],
        [2.0, 2.0, 1.0, 1.0, 0.0],
        [0.0, 0.0, 2.0, 2.0, 2.0],
    ];
    let x = standardize_columns(&dosages).expect("standardize");
    let ld = ld_matrix(&x).expect("ld");
    let beta = array![1.0, 0.0, 0.0, 0.0, 0.0];
    let z = ld.dot(&beta);
    let phenotype = x.dot(&beta);
    let init = infinitesimal_init(&ld, &z, 10_000.0, 0.5).expect("init");
    Toy {
        x,
        ld,
        z,
        phenotype,
        init,
    }
}

impl Toy {
    fn inputs(&self) -> SweepInputs<'_> {
        SweepInputs {
            genotypes: &self.x,
            ld: &self.ld,
            z: &self.z,
            phenotype: &self.phenotype,
            init: Some(&self.init),
        }
    }
}

fn sgd_config(steps: usize) -> SweepConfig {
    SweepConfig {
        steps,
        learning_rate: 0.05,
        optimizer: OptimizerKind::Sgd,
        seed: 7,
        ..SweepConfig::default()
    }
}

#[test]
fn grid_points_are_scale1_major() {
    let grid = SweepGrid {
        scale1: vec![1.0, 0.1],
        scale2: 0.01,
        mixture_prob: vec![0.2, 0.8],
    };
    let points = grid.points();
    assert_eq!(points.len(), 4);
    let pairs: Vec<(f64, f64)> = points.iter().map(|p| (p.scale1, p.mixture_prob)).collect();
    assert_eq!(pairs, vec![(1.0, 0.2), (1.0, 0.8), (0.1, 0.2), (0.1, 0.8)]);
    assert!(points.iter().enumerate().all(|(i, p)| p.index == i));
}

#[test]
fn invalid_grid_is_rejected() {
    let grid = SweepGrid {
        scale1: vec![1.0, f64::NAN],
        scale2: 0.01,
        mixture_prob: vec![0.5],
    };
    assert!(grid.validate().is_err());
    let grid = SweepGrid {
        scale1: vec![1.0],
        scale2: 0.01,
        mixture_prob: vec![],
    };
    assert!(grid.validate().is_err());
}

#[test]
fn toy_sweep_prefers_true_sparsity() {
    let toy = toy();
    let grid = SweepGrid {
        scale1: vec![1.0, 0.05],
        scale2: 0.05,
        mixture_prob: vec![0.2, 0.8],
    };
    let table = sweep(&toy.inputs(), &grid, &sgd_config(300)).expect("sweep");

    assert_eq!(table.len(), 4);
    assert_eq!(table.n_failed(), 0);

    let rows = table.sorted_by_correlation();
    let best = rows.first().expect("best row");
    let worst = rows.last().expect("worst row");
    assert!(
        (best.point.scale1 - 1.0).abs() < (worst.point.scale1 - 1.0).abs(),
        "best scale1 {} vs worst scale1 {}",
        best.point.scale1,
        worst.point.scale1
    );
    let correlations: Vec<f64> = rows.iter().filter_map(|r| r.correlation()).collect();
    assert!(correlations.windows(2).all(|w| w[0] >= w[1]));
    assert!(correlations[0] > 0.9);

    let df = table.to_dataframe().expect("dataframe");
    assert_eq!(df.height(), 4);
    assert_eq!(
        df.get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>(),
        vec![
            "scale1",
            "scale2",
            "mixture_prob",
            "correlation",
            "final_loss",
            "steps",
            "status"
        ]
    );
}

#[test]
fn refitting_a_point_reproduces_the_trace() {
    let toy = toy();
    let point = GridPoint {
        index: 3,
        scale1: 1.0,
        scale2: 0.05,
        mixture_prob: 0.2,
    };
    let config = sgd_config(50);
    let first = fit_with_seed(&toy.inputs(), &point, &config, 99).expect("fit");
    let second = fit_with_seed(&toy.inputs(), &point, &config, 99).expect("fit");
    assert_eq!(first.losses, second.losses);
    assert_eq!(first.posterior_mean, second.posterior_mean);
    assert_eq!(first.correlation, second.correlation);

    let record = fit_point(&toy.inputs(), &point, &config);
    let FitOutcome::Fitted(summary) = record.outcome else {
        panic!("expected a fitted point");
    };
    let seeded = fit_with_seed(&toy.inputs(), &point, &config, config.seed + 3).expect("fit");
    assert_eq!(summary.losses, seeded.losses);
}

#[test]
fn parallel_sweep_matches_sequential() {
    let toy = toy();
    let grid = SweepGrid {
        scale1: vec![1.0, 0.05],
        scale2: 0.05,
        mixture_prob: vec![0.2, 0.8],
    };
    let sequential = sweep(&toy.inputs(), &grid, &sgd_config(40)).expect("sweep");
    let parallel = sweep(
        &toy.inputs(),
        &grid,
        &SweepConfig {
            cores: Some(2),
            ..sgd_config(40)
        },
    )
    .expect("sweep");
    for (a, b) in sequential.records().iter().zip(parallel.records()) {
        assert_eq!(a.point, b.point);
        assert_eq!(a.correlation(), b.correlation());
    }
}

#[test]
fn diverging_point_is_recorded_and_sweep_continues() {
    let toy = toy();
    let grid = SweepGrid {
        scale1: vec![1.0, 0.001],
        scale2: 0.05,
        mixture_prob: vec![1.0],
    };
    let table = sweep(&toy.inputs(), &grid, &sgd_config(300)).expect("sweep");
    assert_eq!(table.len(), 2);
    assert_eq!(table.n_failed(), 1);

    let records = table.records();
    assert!(records[0].correlation().is_some());
    match &records[1].outcome {
        FitOutcome::Failed { reason } => assert!(reason.contains("diverged"), "{reason}"),
        FitOutcome::Fitted(_) => panic!("stiff prior with a large step should diverge"),
    }
    let best = table.best().expect("best");
    assert_eq!(best.point.index, 0);
    assert_eq!(table.sorted_by_correlation()[1].point.index, 1);
}

#[test]
fn constant_phenotype_is_a_failed_point() {
    let toy = toy();
    let phenotype = Array1::from_elem(10, 1.0);
    let inputs = SweepInputs {
        phenotype: &phenotype,
        ..toy.inputs()
    };
    let point = GridPoint {
        index: 0,
        scale1: 1.0,
        scale2: 0.05,
        mixture_prob: 0.5,
    };
    let record = fit_point(&inputs, &point, &sgd_config(5));
    assert!(record.correlation().is_none());
    assert!(record.status().starts_with("failed"));
}
