use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use polars::prelude::*;

use crate::df_utils::{
    ensure_f64, ensure_utf8, extract_f64_column, extract_string_column, fill_se_from_p,
    filter_missing, filter_non_acgt, filter_p_threshold, remove_duplicate_snps, uppercase_alleles,
};
use crate::error::PrsError;
use crate::io::read_table;
use crate::logging::RunLog;
use crate::qc::check_range_f64;
use crate::schema::{ColumnMapConfig, resolve_column_map};
use crate::types::SumstatRecord;

#[derive(Debug, Clone)]
pub struct SumstatsConfig {
    pub p_threshold: f64,
    pub n: Option<f64>,
    pub column_names: HashMap<String, String>,
}

impl Default for SumstatsConfig {
    fn default() -> Self {
        Self {
            p_threshold: 1.0,
            n: None,
            column_names: HashMap::new(),
        }
    }
}

pub fn load_sumstats(
    path: &Path,
    config: &SumstatsConfig,
    log: &mut RunLog,
) -> Result<Vec<SumstatRecord>> {
    let df = read_table(path).with_context(|| format!("read sumstats {}", path.display()))?;
    prepare_sumstats(df, &path.display().to_string(), config, log)
}

pub fn prepare_sumstats(
    mut df: DataFrame,
    filename: &str,
    config: &SumstatsConfig,
    log: &mut RunLog,
) -> Result<Vec<SumstatRecord>> {
    check_range_f64(config.p_threshold, 0.0, 1.0, false, "p_threshold")?;

    let headers: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let map = resolve_column_map(
        &headers,
        &ColumnMapConfig::sumstats(filename, config.column_names.clone()),
    )?;
    for msg in &map.info {
        log.line(msg)?;
    }
    for msg in &map.warnings {
        log.warn(msg)?;
    }
    df.set_column_names(&map.headers)?;

    df = ensure_utf8(df, &["SNP", "A1", "A2"])?;
    df = ensure_f64(df, &["EFFECT", "SE", "N", "P"])?;
    df = uppercase_alleles(df)?;

    let (df_tmp, removed) = remove_duplicate_snps(df)?;
    df = df_tmp;
    if removed > 0 {
        log.line(&format!(
            "{removed} duplicated SNP row(s) removed from {filename}; the first occurrence was kept"
        ))?;
    }

    let (df_tmp, removed) = filter_non_acgt(df, "A1", "A2")?;
    df = df_tmp;
    if removed > 0 {
        log.line(&format!(
            "{removed} row(s) removed from {filename} due to non-ACGT alleles"
        ))?;
    }

    let (df_tmp, removed) = filter_missing(df, "EFFECT")?;
    df = df_tmp;
    if removed > 0 {
        log.line(&format!(
            "{removed} row(s) removed from {filename} due to missing values in EFFECT"
        ))?;
    }

    let (df_tmp, removed) = filter_p_threshold(df, config.p_threshold)?;
    df = df_tmp;
    if removed > 0 {
        log.line(&format!(
            "{removed} row(s) removed from {filename} with P above {}",
            config.p_threshold
        ))?;
    }

    let (df_tmp, filled) = fill_se_from_p(df)?;
    df = df_tmp;
    if filled > 0 {
        log.line(&format!(
            "{filled} standard error(s) in {filename} were derived from EFFECT and P"
        ))?;
    }
    if df.column("SE").is_err() {
        return Err(PrsError::MissingColumn(format!(
            "SE (or P to derive it) in {filename}"
        ))
        .into());
    }

    let (df_tmp, removed) = filter_missing(df, "SE")?;
    df = df_tmp;
    if removed > 0 {
        log.line(&format!(
            "{removed} row(s) removed from {filename} due to missing values in SE"
        ))?;
    }

    let records = to_records(&df, config.n)?;
    let before = records.len();
    let records: Vec<SumstatRecord> = records.into_iter().filter(|r| r.se > 0.0).collect();
    if records.len() < before {
        log.line(&format!(
            "{} row(s) removed from {filename} due to non-positive SE",
            before - records.len()
        ))?;
    }
    log.line(&format!(
        "{} SNPs retained from summary statistics {filename}",
        records.len()
    ))?;
    Ok(records)
}

fn to_records(df: &DataFrame, n_override: Option<f64>) -> Result<Vec<SumstatRecord>> {
    let height = df.height();
    let snp = extract_string_column(df, "SNP")?;
    let a1 = extract_string_column(df, "A1")?;
    let a2 = extract_string_column(df, "A2")?;
    let beta = extract_f64_column(df, "EFFECT")?;
    let se = extract_f64_column(df, "SE")?;
    let n = match (n_override, df.column("N").is_ok()) {
        (Some(n), _) => vec![n; height],
        (None, true) => extract_f64_column(df, "N")?,
        (None, false) => vec![f64::NAN; height],
    };
    let p = if df.column("P").is_ok() {
        extract_f64_column(df, "P")?
    } else {
        vec![f64::NAN; height]
    };

    Ok((0..height)
        .map(|i| SumstatRecord {
            snp: snp[i].clone(),
            a1: a1[i].clone(),
            a2: a2[i].clone(),
            beta: beta[i],
            se: se[i],
            n: n[i],
            p: p[i],
        })
        .collect())
}
