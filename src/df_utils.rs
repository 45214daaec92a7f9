use std::borrow::Cow;

use anyhow::{Context, Result};
use polars::prelude::*;
use statrs::distribution::{ChiSquared, ContinuousCDF};

pub fn ensure_utf8(mut df: DataFrame, cols: &[&str]) -> Result<DataFrame> {
    for col in cols {
        if let Ok(column) = df.column(col)
            && let Some(series) = column.as_series()
            && series.dtype() != &DataType::String
        {
            let mut casted = series.cast(&DataType::String)?;
            casted.rename((*col).into());
            df.with_column(Column::from(casted))?;
        }
    }
    Ok(df)
}

pub fn ensure_f64(mut df: DataFrame, cols: &[&str]) -> Result<DataFrame> {
    for col in cols {
        if let Ok(column) = df.column(col)
            && let Some(series) = column.as_series()
            && series.dtype() != &DataType::Float64
        {
            let mut casted = series.cast(&DataType::Float64)?;
            casted.rename((*col).into());
            df.with_column(Column::from(casted))?;
        }
    }
    Ok(df)
}

pub fn uppercase_alleles(mut df: DataFrame) -> Result<DataFrame> {
    for col in ["A1", "A2"] {
        if let Ok(column) = df.column(col)
            && let Some(series) = column.as_series()
            && let Ok(utf8) = series.str()
        {
            let mut upper = utf8
                .apply(|v| v.map(|s| Cow::Owned(s.trim().to_ascii_uppercase())))
                .into_series();
            upper.rename(col.into());
            df.with_column(Column::from(upper))?;
        }
    }
    Ok(df)
}

pub fn filter_non_acgt(
    mut df: DataFrame,
    a1_col: &str,
    a2_col: &str,
) -> Result<(DataFrame, usize)> {
    if df.column(a1_col).is_err() || df.column(a2_col).is_err() {
        return Ok((df, 0));
    }
    let before = df.height();
    let a1 = df.column(a1_col)?.str().context("A1")?;
    let a2 = df.column(a2_col)?.str().context("A2")?;
    let mask: BooleanChunked = a1
        .into_iter()
        .zip(a2)
        .map(|(a1v, a2v)| match (a1v, a2v) {
            (Some(x), Some(y)) => crate::utils::is_acgt(x) && crate::utils::is_acgt(y),
            _ => false,
        })
        .collect();
    df = df.filter(&mask)?;
    let removed = before.saturating_sub(df.height());
    Ok((df, removed))
}

pub fn filter_missing(mut df: DataFrame, col: &str) -> Result<(DataFrame, usize)> {
    if df.column(col).is_err() {
        return Ok((df, 0));
    }
    let before = df.height();
    let column = df.column(col)?;
    let series = column.as_series().context("series")?;
    let mask = match series.dtype() {
        DataType::Float64 => series.is_not_null() & series.f64()?.is_not_nan(),
        _ => series.is_not_null(),
    };
    df = df.filter(&mask)?;
    let removed = before.saturating_sub(df.height());
    Ok((df, removed))
}

pub fn filter_p_threshold(mut df: DataFrame, threshold: f64) -> Result<(DataFrame, usize)> {
    if df.column("P").is_err() {
        return Ok((df, 0));
    }
    let before = df.height();
    let keep_missing = threshold >= 1.0;
    let p = df.column("P")?.f64().context("P")?;
    let mask: BooleanChunked = p
        .into_iter()
        .map(|v| match v {
            Some(p) if p.is_finite() => p <= threshold,
            _ => keep_missing,
        })
        .collect();
    df = df.filter(&mask)?;
    let removed = before.saturating_sub(df.height());
    Ok((df, removed))
}

// se = |beta| / sqrt(chi2_1^-1(1 - p))
pub fn fill_se_from_p(mut df: DataFrame) -> Result<(DataFrame, usize)> {
    if df.column("EFFECT").is_err() || df.column("P").is_err() {
        return Ok((df, 0));
    }
    let chi = ChiSquared::new(1.0).context("chi-square distribution")?;
    let effect = df.column("EFFECT")?.f64().context("EFFECT")?;
    let pvals = df.column("P")?.f64().context("P")?;
    let existing: Vec<Option<f64>> = match df.column("SE") {
        Ok(col) => col.f64().context("SE")?.into_iter().collect(),
        Err(_) => vec![None; df.height()],
    };

    let mut filled = 0usize;
    let se: Float64Chunked = effect
        .into_iter()
        .zip(pvals)
        .zip(existing)
        .map(|((eff, p), se)| match (se, eff, p) {
            (Some(se), _, _) if se.is_finite() => Some(se),
            (_, Some(e), Some(p)) if p > 0.0 && p < 1.0 && e != 0.0 => {
                let z = chi.inverse_cdf(1.0 - p).sqrt();
                filled += 1;
                Some(e.abs() / z)
            }
            _ => None,
        })
        .collect();

    let mut series = se.into_series();
    series.rename("SE".into());
    df.with_column(Column::from(series))?;
    Ok((df, filled))
}

pub fn remove_duplicate_snps(mut df: DataFrame) -> Result<(DataFrame, usize)> {
    let before = df.height();
    let snp = df.column("SNP")?.str().context("SNP")?;
    let mut seen = std::collections::HashSet::new();
    let mask: BooleanChunked = snp
        .into_iter()
        .map(|v| match v {
            Some(id) => seen.insert(id.to_string()),
            None => false,
        })
        .collect();
    df = df.filter(&mask)?;
    let removed = before.saturating_sub(df.height());
    Ok((df, removed))
}

pub fn extract_f64_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = df
        .column(name)
        .with_context(|| format!("column {name}"))?
        .cast(&DataType::Float64)
        .with_context(|| format!("cast {name} to f64"))?;
    Ok(series
        .f64()
        .context("cast f64")?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

pub fn extract_string_column(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let series = df
        .column(name)
        .with_context(|| format!("column {name}"))?
        .cast(&DataType::String)
        .with_context(|| format!("cast {name} to string"))?;
    Ok(series
        .str()
        .context("cast string")?
        .into_iter()
        .map(|v| v.unwrap_or("").to_string())
        .collect())
}
