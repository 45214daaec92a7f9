use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array1, Axis};
use polars::prelude::*;

use crate::error::PrsError;
use crate::harmonize::{HarmonizeConfig, harmonize};
use crate::infinitesimal::infinitesimal_init;
use crate::io::{
    read_genotype_phenotype, read_genotypes, read_phenotype, read_variants, write_dataframe,
};
use crate::logging::RunLog;
use crate::matrix::ld_matrix;
use crate::qc::{check_file_exists, check_range_f64};
use crate::stats::median;
use crate::sumstats::{SumstatsConfig, load_sumstats};
use crate::sweep::{
    FitOutcome, FitSummary, SweepConfig, SweepGrid, SweepInputs, SweepRecord, SweepTable, sweep,
};
use crate::types::{EffectScaling, GenotypeMatrix, HarmonizedData, InitStrategy, SumstatRecord};

const PLINK_MISSING_PHENOTYPE: f64 = -9.0;

#[derive(Debug, Clone)]
pub struct PrsConfig {
    pub genotypes: PathBuf,
    pub variants: PathBuf,
    pub sumstats: PathBuf,
    pub phenotype: Option<PathBuf>,
    pub phenotype_column: Option<String>,
    pub out_prefix: String,
    pub sumstats_config: SumstatsConfig,
    pub harmonize: HarmonizeConfig,
    pub effect_scaling: EffectScaling,
    pub init: InitStrategy,
    pub grid: SweepGrid,
    pub sweep: SweepConfig,
    pub write_log: bool,
}

impl Default for PrsConfig {
    fn default() -> Self {
        Self {
            genotypes: PathBuf::new(),
            variants: PathBuf::new(),
            sumstats: PathBuf::new(),
            phenotype: None,
            phenotype_column: None,
            out_prefix: "bbviprs".to_string(),
            sumstats_config: SumstatsConfig::default(),
            harmonize: HarmonizeConfig::default(),
            effect_scaling: EffectScaling::default(),
            init: InitStrategy::default(),
            grid: SweepGrid {
                scale1: vec![1.0, 0.1, 0.01],
                scale2: 0.001,
                mixture_prob: vec![0.01, 0.1, 0.5],
            },
            sweep: SweepConfig::default(),
            write_log: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrsRun {
    pub harmonized: HarmonizedData,
    pub table: SweepTable,
    pub results_path: PathBuf,
    pub weights_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PreparedInputs {
    pub harmonized: HarmonizedData,
    pub phenotype: Option<Array1<f64>>,
}

fn validate_config(config: &PrsConfig) -> Result<()> {
    check_file_exists(&config.genotypes, "genotypes")?;
    check_file_exists(&config.variants, "variants")?;
    check_file_exists(&config.sumstats, "sumstats")?;
    if let Some(path) = &config.phenotype {
        check_file_exists(path, "phenotype")?;
    }
    if config.out_prefix.trim().is_empty() {
        return Err(PrsError::InvalidArgument("output prefix must not be empty".to_string()).into());
    }
    if let InitStrategy::Infinitesimal { h2 } = config.init {
        check_range_f64(h2, 0.0, 1.0, false, "h2")?;
        if h2 == 0.0 {
            return Err(PrsError::InvalidArgument(
                "h2 must be above 0 for infinitesimal initialization".to_string(),
            )
            .into());
        }
    }
    config.grid.validate()?;
    config.sweep.validate()?;
    Ok(())
}

fn load_phenotype(config: &PrsConfig) -> Result<Option<HashMap<String, f64>>> {
    match &config.phenotype {
        Some(path) => Ok(Some(read_phenotype(
            path,
            config.phenotype_column.as_deref(),
        )?)),
        None => Ok(read_genotype_phenotype(&config.genotypes)?.map(|values| {
            values
                .into_iter()
                .filter(|(_, v)| *v != PLINK_MISSING_PHENOTYPE)
                .collect()
        })),
    }
}

fn subset_to_phenotyped(
    genotypes: &GenotypeMatrix,
    phenotype: &HashMap<String, f64>,
    log: &mut RunLog,
) -> Result<(GenotypeMatrix, Array1<f64>)> {
    let mut rows = Vec::new();
    let mut values = Vec::new();
    for (idx, id) in genotypes.sample_ids.iter().enumerate() {
        if let Some(&v) = phenotype.get(id)
            && v.is_finite()
        {
            rows.push(idx);
            values.push(v);
        }
    }
    let dropped = genotypes.sample_ids.len() - rows.len();
    if dropped > 0 {
        log.warn(&format!(
            "{dropped} genotyped sample(s) have no phenotype and were removed"
        ))?;
    }
    log.line(&format!("{} samples with genotypes and phenotype", rows.len()))?;

    let subset = GenotypeMatrix {
        sample_ids: rows.iter().map(|&i| genotypes.sample_ids[i].clone()).collect(),
        snp_ids: genotypes.snp_ids.clone(),
        dosages: genotypes.dosages.select(Axis(0), &rows),
    };
    Ok((subset, Array1::from(values)))
}

pub fn harmonize_inputs(config: &PrsConfig, log: &mut RunLog) -> Result<PreparedInputs> {
    let genotypes = read_genotypes(&config.genotypes)?;
    log.line(&format!(
        "Read {} samples x {} SNPs from {}",
        genotypes.sample_ids.len(),
        genotypes.snp_ids.len(),
        config.genotypes.display()
    ))?;
    let variants = read_variants(&config.variants)?;
    log.line(&format!(
        "Read alleles for {} variants from {}",
        variants.len(),
        config.variants.display()
    ))?;
    let sumstats = load_sumstats(&config.sumstats, &config.sumstats_config, log)?;

    let (genotypes, phenotype) = match load_phenotype(config)? {
        Some(values) => {
            let (subset, phenotype) = subset_to_phenotyped(&genotypes, &values, log)?;
            (subset, Some(phenotype))
        }
        None => (genotypes, None),
    };

    let harmonized = harmonize(&genotypes, &variants, &sumstats, &config.harmonize, log)
        .context("harmonize genotypes with summary statistics")?;
    Ok(PreparedInputs {
        harmonized,
        phenotype,
    })
}

pub fn observed_effects(
    records: &[SumstatRecord],
    scaling: EffectScaling,
) -> crate::error::Result<Array1<f64>> {
    let values: Vec<f64> = records
        .iter()
        .map(|r| match scaling {
            EffectScaling::ZScore => r.beta / r.se,
            EffectScaling::PerSample => r.beta / (r.se * r.n.sqrt()),
        })
        .collect();
    if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
        let hint = match scaling {
            EffectScaling::PerSample => " (per-sample scaling needs a positive N)",
            EffectScaling::ZScore => "",
        };
        return Err(PrsError::InvalidArgument(format!(
            "observed effect of {} is not finite{hint}",
            records[idx].snp
        )));
    }
    Ok(Array1::from(values))
}

pub fn harmonized_table(data: &HarmonizedData, scaling: EffectScaling) -> Result<DataFrame> {
    let z = observed_effects(&data.sumstats, scaling)?;
    let records = &data.sumstats;
    let df = df!(
        "SNP" => records.iter().map(|r| r.snp.clone()).collect::<Vec<_>>(),
        "A1" => records.iter().map(|r| r.a1.clone()).collect::<Vec<_>>(),
        "A2" => records.iter().map(|r| r.a2.clone()).collect::<Vec<_>>(),
        "BETA" => records.iter().map(|r| r.beta).collect::<Vec<_>>(),
        "SE" => records.iter().map(|r| r.se).collect::<Vec<_>>(),
        "N" => records.iter().map(|r| r.n).collect::<Vec<_>>(),
        "P" => records.iter().map(|r| r.p).collect::<Vec<_>>(),
        "Z" => z.to_vec(),
    )?;
    Ok(df)
}

pub fn weights_table(data: &HarmonizedData, summary: &FitSummary) -> Result<DataFrame> {
    let records = &data.sumstats;
    let df = df!(
        "SNP" => records.iter().map(|r| r.snp.clone()).collect::<Vec<_>>(),
        "A1" => records.iter().map(|r| r.a1.clone()).collect::<Vec<_>>(),
        "A2" => records.iter().map(|r| r.a2.clone()).collect::<Vec<_>>(),
        "WEIGHT" => summary.posterior_mean.to_vec(),
        "SD" => summary.posterior_sd.to_vec(),
    )?;
    Ok(df)
}

fn median_sample_size(records: &[SumstatRecord]) -> crate::error::Result<f64> {
    let n: Vec<f64> = records.iter().map(|r| r.n).collect();
    median(&n)
        .filter(|v| *v > 0.0)
        .ok_or_else(|| {
            PrsError::InvalidArgument(
                "infinitesimal initialization needs the GWAS sample size (N column or --n)"
                    .to_string(),
            )
        })
}

fn failed_table(grid: &SweepGrid, reason: &str) -> SweepTable {
    SweepTable::new(
        grid.points()
            .into_iter()
            .map(|point| SweepRecord {
                point,
                outcome: FitOutcome::Failed {
                    reason: reason.to_string(),
                },
            })
            .collect(),
    )
}

fn output_path(prefix: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}_{suffix}"))
}

pub fn run(config: &PrsConfig) -> Result<PrsRun> {
    validate_config(config)?;
    let mut log = if config.write_log {
        RunLog::create(&config.out_prefix)?
    } else {
        RunLog::disabled()
    };

    let PreparedInputs {
        harmonized,
        phenotype,
    } = harmonize_inputs(config, &mut log)?;
    let phenotype = phenotype.ok_or_else(|| {
        PrsError::MissingColumn(format!(
            "PHENOTYPE in {} (pass a phenotype file instead)",
            config.genotypes.display()
        ))
    })?;

    let z = observed_effects(&harmonized.sumstats, config.effect_scaling)?;
    let ld = ld_matrix(&harmonized.genotypes)?;

    let init = match config.init {
        InitStrategy::Zero => Ok(None),
        InitStrategy::Infinitesimal { h2 } => {
            let n_gwas = median_sample_size(&harmonized.sumstats)?;
            log.line(&format!(
                "Infinitesimal initialization with h2 = {h2} and N = {n_gwas}"
            ))?;
            infinitesimal_init(&ld, &z, n_gwas, h2).map(Some)
        }
    };

    let table = match &init {
        Ok(init) => {
            let inputs = SweepInputs {
                genotypes: &harmonized.genotypes,
                ld: &ld,
                z: &z,
                phenotype: &phenotype,
                init: init.as_ref(),
            };
            sweep(&inputs, &config.grid, &config.sweep)?
        }
        Err(err) => {
            log.warn(&format!(
                "Infinitesimal initialization failed, no grid point can be fitted: {err}"
            ))?;
            failed_table(&config.grid, &err.to_string())
        }
    };

    let results_path = output_path(&config.out_prefix, "sweep.tsv");
    write_dataframe(&table.to_dataframe()?, &results_path)?;
    log.line(&format!("Sweep results written to {}", results_path.display()))?;

    let weights_path = match table.best().and_then(|best| best.summary().map(|s| (best, s))) {
        Some((best, summary)) => {
            log.line(&format!(
                "Best grid point: scale1 = {}, scale2 = {}, mixture_prob = {} (correlation {:.4})",
                best.point.scale1, best.point.scale2, best.point.mixture_prob, summary.correlation
            ))?;
            let path = output_path(&config.out_prefix, "weights.tsv");
            write_dataframe(&weights_table(&harmonized, summary)?, &path)?;
            log.line(&format!("Weights written to {}", path.display()))?;
            Some(path)
        }
        None => {
            log.warn("No grid point produced a usable fit; no weights written")?;
            None
        }
    };

    Ok(PrsRun {
        harmonized,
        table,
        results_path,
        weights_path,
    })
}

pub fn write_harmonized(config: &PrsConfig, out: &Path) -> Result<HarmonizedData> {
    check_file_exists(&config.genotypes, "genotypes")?;
    check_file_exists(&config.variants, "variants")?;
    check_file_exists(&config.sumstats, "sumstats")?;
    let mut log = if config.write_log {
        RunLog::create(&config.out_prefix)?
    } else {
        RunLog::disabled()
    };
    let prepared = harmonize_inputs(config, &mut log)?;
    write_dataframe(
        &harmonized_table(&prepared.harmonized, config.effect_scaling)?,
        out,
    )?;
    log.line(&format!("Harmonized summary statistics written to {}", out.display()))?;
    Ok(prepared.harmonized)
}
