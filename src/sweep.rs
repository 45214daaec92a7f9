use std::cmp::Ordering;
use std::time::Duration;

use anyhow::Result;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::distributions::{MeanFieldPosterior, MixturePrior};
use crate::error::PrsError;
use crate::matrix::polygenic_score;
use crate::objective::{DEFAULT_MC_SAMPLES, ElboObjective};
use crate::optim::{OptimSettings, fit};
use crate::parallel::{resolve_threads, run_in_pool};
use crate::qc::{check_equal_length, check_non_empty, check_positive, check_range_f64};
use crate::stats::pearson;
use crate::types::OptimizerKind;

#[derive(Debug, Clone, PartialEq)]
pub struct SweepGrid {
    pub scale1: Vec<f64>,
    pub scale2: f64,
    pub mixture_prob: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub index: usize,
    pub scale1: f64,
    pub scale2: f64,
    pub mixture_prob: f64,
}

impl SweepGrid {
    pub fn validate(&self) -> crate::error::Result<()> {
        check_non_empty(&self.scale1, "scale1 grid")?;
        check_non_empty(&self.mixture_prob, "mixture_prob grid")?;
        for &s in &self.scale1 {
            check_positive(s, "scale1")?;
        }
        check_positive(self.scale2, "scale2")?;
        for &p in &self.mixture_prob {
            check_range_f64(p, 0.0, 1.0, false, "mixture_prob")?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.scale1.len() * self.mixture_prob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn points(&self) -> Vec<GridPoint> {
        self.scale1
            .iter()
            .flat_map(|&scale1| self.mixture_prob.iter().map(move |&p| (scale1, p)))
            .enumerate()
            .map(|(index, (scale1, mixture_prob))| GridPoint {
                index,
                scale1,
                scale2: self.scale2,
                mixture_prob,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub steps: usize,
    pub learning_rate: f64,
    pub n_mc_samples: usize,
    pub optimizer: OptimizerKind,
    pub kl_weight: Option<f64>,
    pub seed: u64,
    pub cores: Option<usize>,
    pub max_fit_duration: Option<Duration>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            steps: 500,
            learning_rate: 0.01,
            n_mc_samples: DEFAULT_MC_SAMPLES,
            optimizer: OptimizerKind::Adam,
            kl_weight: None,
            seed: 42,
            cores: None,
            max_fit_duration: None,
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.steps == 0 {
            return Err(PrsError::InvalidArgument(
                "steps must be at least 1".to_string(),
            ));
        }
        if self.n_mc_samples == 0 {
            return Err(PrsError::InvalidArgument(
                "Monte Carlo sample count must be at least 1".to_string(),
            ));
        }
        check_positive(self.learning_rate, "learning rate")?;
        if let Some(cores) = self.cores
            && cores == 0
        {
            return Err(PrsError::InvalidArgument(
                "cores must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn optim_settings(&self) -> OptimSettings {
        OptimSettings {
            kind: self.optimizer,
            steps: self.steps,
            learning_rate: self.learning_rate,
            max_duration: self.max_fit_duration,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SweepInputs<'a> {
    pub genotypes: &'a Array2<f64>,
    pub ld: &'a Array2<f64>,
    pub z: &'a Array1<f64>,
    pub phenotype: &'a Array1<f64>,
    pub init: Option<&'a Array1<f64>>,
}

impl SweepInputs<'_> {
    pub fn validate(&self) -> crate::error::Result<()> {
        let (n_samples, n_snps) = self.genotypes.dim();
        if n_snps != self.z.len() || self.ld.nrows() != self.z.len() {
            return Err(PrsError::InvalidArgument(format!(
                "genotypes ({n_snps} SNPs), LD ({} SNPs) and effects ({} SNPs) disagree",
                self.ld.nrows(),
                self.z.len()
            )));
        }
        check_equal_length(n_samples, self.phenotype.len(), "genotype samples", "phenotype")?;
        if let Some(init) = self.init
            && init.len() != n_snps
        {
            return Err(PrsError::InvalidArgument(format!(
                "initial effects have length {}, expected {n_snps}",
                init.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FitSummary {
    pub correlation: f64,
    pub final_loss: f64,
    pub steps: usize,
    pub budget_exhausted: bool,
    pub losses: Vec<f64>,
    pub posterior_mean: Array1<f64>,
    pub posterior_sd: Array1<f64>,
}

#[derive(Debug, Clone)]
pub enum FitOutcome {
    Fitted(FitSummary),
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct SweepRecord {
    pub point: GridPoint,
    pub outcome: FitOutcome,
}

impl SweepRecord {
    pub fn correlation(&self) -> Option<f64> {
        match &self.outcome {
            FitOutcome::Fitted(summary) => Some(summary.correlation),
            FitOutcome::Failed { .. } => None,
        }
    }

    pub fn summary(&self) -> Option<&FitSummary> {
        match &self.outcome {
            FitOutcome::Fitted(summary) => Some(summary),
            FitOutcome::Failed { .. } => None,
        }
    }

    pub fn status(&self) -> String {
        match &self.outcome {
            FitOutcome::Fitted(summary) if summary.budget_exhausted => "stopped_early".to_string(),
            FitOutcome::Fitted(_) => "ok".to_string(),
            FitOutcome::Failed { reason } => format!("failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SweepTable {
    records: Vec<SweepRecord>,
}

impl SweepTable {
    pub fn new(mut records: Vec<SweepRecord>) -> Self {
        records.sort_by_key(|r| r.point.index);
        Self { records }
    }

    pub fn records(&self) -> &[SweepRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn n_failed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, FitOutcome::Failed { .. }))
            .count()
    }

    pub fn sorted_by_correlation(&self) -> Vec<&SweepRecord> {
        let mut rows: Vec<&SweepRecord> = self.records.iter().collect();
        rows.sort_by(|a, b| match (a.correlation(), b.correlation()) {
            (Some(x), Some(y)) => y.total_cmp(&x).then(a.point.index.cmp(&b.point.index)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.point.index.cmp(&b.point.index),
        });
        rows
    }

    pub fn best(&self) -> Option<&SweepRecord> {
        self.sorted_by_correlation()
            .into_iter()
            .find(|r| r.correlation().is_some())
    }

    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let rows = self.sorted_by_correlation();
        let scale1: Vec<f64> = rows.iter().map(|r| r.point.scale1).collect();
        let scale2: Vec<f64> = rows.iter().map(|r| r.point.scale2).collect();
        let mixture_prob: Vec<f64> = rows.iter().map(|r| r.point.mixture_prob).collect();
        let correlation: Vec<Option<f64>> = rows.iter().map(|r| r.correlation()).collect();
        let final_loss: Vec<Option<f64>> = rows
            .iter()
            .map(|r| r.summary().map(|s| s.final_loss))
            .collect();
        let steps: Vec<u64> = rows
            .iter()
            .map(|r| r.summary().map_or(0, |s| s.steps as u64))
            .collect();
        let status: Vec<String> = rows.iter().map(|r| r.status()).collect();

        let df = df!(
            "scale1" => scale1,
            "scale2" => scale2,
            "mixture_prob" => mixture_prob,
            "correlation" => correlation,
            "final_loss" => final_loss,
            "steps" => steps,
            "status" => status,
        )?;
        Ok(df)
    }
}

pub fn fit_with_seed(
    inputs: &SweepInputs<'_>,
    point: &GridPoint,
    config: &SweepConfig,
    seed: u64,
) -> crate::error::Result<FitSummary> {
    let n = inputs.z.len();
    let prior = MixturePrior::new(n, point.scale1, point.scale2, point.mixture_prob)?;
    let mut posterior = MeanFieldPosterior::new(n, inputs.init)?;
    let objective = ElboObjective::new(inputs.ld, inputs.z, config.n_mc_samples, config.kl_weight)?;
    let mut rng = StdRng::seed_from_u64(seed);

    let trace = fit(
        &objective,
        &prior,
        &mut posterior,
        &config.optim_settings(),
        &mut rng,
    )?;

    let score = polygenic_score(inputs.genotypes, &posterior.mu);
    let correlation =
        pearson(score.view(), inputs.phenotype.view()).ok_or(PrsError::UndefinedCorrelation)?;

    Ok(FitSummary {
        correlation,
        final_loss: trace.final_loss().unwrap_or(f64::NAN),
        steps: trace.steps,
        budget_exhausted: trace.budget_exhausted,
        losses: trace.losses,
        posterior_sd: posterior.sigma(),
        posterior_mean: posterior.mu,
    })
}

pub fn fit_point(inputs: &SweepInputs<'_>, point: &GridPoint, config: &SweepConfig) -> SweepRecord {
    let seed = config.seed.wrapping_add(point.index as u64);
    let outcome = match fit_with_seed(inputs, point, config, seed) {
        Ok(summary) => {
            info!(
                "scale1={} scale2={} mixture_prob={}: correlation {:.4}, final loss {:.6}",
                point.scale1, point.scale2, point.mixture_prob, summary.correlation, summary.final_loss
            );
            if summary.budget_exhausted {
                warn!(
                    "grid point {} stopped after {} of {} steps (time budget)",
                    point.index, summary.steps, config.steps
                );
            }
            FitOutcome::Fitted(summary)
        }
        Err(err) => {
            warn!(
                "scale1={} scale2={} mixture_prob={} failed: {err}",
                point.scale1, point.scale2, point.mixture_prob
            );
            FitOutcome::Failed {
                reason: err.to_string(),
            }
        }
    };
    SweepRecord {
        point: *point,
        outcome,
    }
}

pub fn sweep(inputs: &SweepInputs<'_>, grid: &SweepGrid, config: &SweepConfig) -> Result<SweepTable> {
    grid.validate()?;
    config.validate()?;
    inputs.validate()?;

    let points = grid.points();
    info!(
        "Sweeping {} grid points ({} scale1 x {} mixture_prob, scale2 = {})",
        points.len(),
        grid.scale1.len(),
        grid.mixture_prob.len(),
        grid.scale2
    );

    let records = if config.cores.is_some() {
        let run = || {
            points
                .par_iter()
                .map(|point| fit_point(inputs, point, config))
                .collect::<Vec<SweepRecord>>()
        };
        let threads = resolve_threads(config.cores, points.len());
        run_in_pool(threads, "build sweep thread pool", run)?
    } else {
        points
            .iter()
            .map(|point| fit_point(inputs, point, config))
            .collect()
    };

    let table = SweepTable::new(records);
    if table.n_failed() > 0 {
        warn!("{} of {} grid points failed", table.n_failed(), table.len());
    }
    Ok(table)
}
