use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use ndarray::Array2;
use polars::prelude::*;
use tempfile::NamedTempFile;

use crate::df_utils::{ensure_utf8, extract_f64_column, extract_string_column, uppercase_alleles};
use crate::error::PrsError;
use crate::schema::{ColumnMapConfig, resolve_column_map};
use crate::types::{GenotypeMatrix, VariantAlleles};

const PLINK_RAW_META: [&str; 6] = ["FID", "IID", "PAT", "MAT", "SEX", "PHENOTYPE"];

const MISSING_TOKENS: [&str; 4] = ["", "NA", "NaN", "."];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Plain,
    Gzip,
    Bzip2,
}

impl Compression {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("gz") => Compression::Gzip,
            Some(ext) if ext.eq_ignore_ascii_case("bz2") => Compression::Bzip2,
            _ => Compression::Plain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    Byte(u8),
    Whitespace,
}

pub fn read_table(path: &Path) -> Result<DataFrame> {
    let compression = Compression::from_path(path);
    if compression == Compression::Plain {
        return read_delimited(path);
    }
    let plain = decompress(path, compression)?;
    read_delimited(plain.path())
}

fn read_delimited(path: &Path) -> Result<DataFrame> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut header = String::new();
    reader.read_line(&mut header)?;
    if header.trim().is_empty() {
        return Err(anyhow::anyhow!("{} is empty", path.display()));
    }

    match sniff_separator(&header) {
        Separator::Whitespace => read_whitespace(&header, reader),
        Separator::Byte(separator) => {
            let df = CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(
                    CsvParseOptions::default()
                        .with_separator(separator)
                        .with_null_values(Some(NullValues::AllColumns(
                            MISSING_TOKENS.iter().map(|t| (*t).into()).collect(),
                        )))
                        .with_missing_is_null(true),
                )
                .with_ignore_errors(true)
                .try_into_reader_with_file_path(Some(path.to_path_buf()))?
                .finish()
                .with_context(|| format!("read {}", path.display()))?;
            trim_string_columns(df)
        }
    }
}

// Rows shorter than the header are padded with missing values.
fn read_whitespace<R: BufRead>(header: &str, reader: R) -> Result<DataFrame> {
    let names: Vec<&str> = header.split_whitespace().collect();
    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        for column in columns.iter_mut() {
            column.push(fields.next().and_then(parse_field));
        }
    }

    let df: DataFrame = names
        .into_iter()
        .zip(columns)
        .map(|(name, values)| Series::new(name.into(), values))
        .collect();
    Ok(df)
}

fn sniff_separator(header: &str) -> Separator {
    if header.contains('\t') {
        Separator::Byte(b'\t')
    } else if header.contains(',') {
        Separator::Byte(b',')
    } else {
        Separator::Whitespace
    }
}

fn decompress(path: &Path, compression: Compression) -> Result<NamedTempFile> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut decoder: Box<dyn Read> = match compression {
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::Bzip2 => Box::new(BzDecoder::new(file)),
        Compression::Plain => Box::new(file),
    };
    let mut plain = NamedTempFile::new()?;
    std::io::copy(&mut decoder, &mut plain)
        .with_context(|| format!("decompress {}", path.display()))?;
    Ok(plain)
}

fn trim_string_columns(mut df: DataFrame) -> Result<DataFrame> {
    let string_columns: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|c| c.dtype() == &DataType::String)
        .map(|c| c.name().to_string())
        .collect();
    for name in string_columns {
        let mut trimmed = df
            .column(&name)?
            .str()?
            .apply(|v| v.map(|s| Cow::Owned(s.trim().to_string())))
            .into_series();
        trimmed.rename(name.as_str().into());
        df.with_column(Column::from(trimmed))?;
    }
    Ok(df)
}

fn parse_field(value: &str) -> Option<String> {
    let value = value.trim();
    if MISSING_TOKENS.iter().any(|t| value.eq_ignore_ascii_case(t)) {
        None
    } else {
        Some(value.to_string())
    }
}

fn resolve_id_column(names: &[String]) -> Result<String> {
    if let Some(name) = names.iter().find(|n| n.eq_ignore_ascii_case("IID")) {
        return Ok(name.clone());
    }
    names
        .first()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("table has no columns"))
}

pub fn read_genotypes(path: &Path) -> Result<GenotypeMatrix> {
    let df = read_table(path).with_context(|| format!("read genotypes {}", path.display()))?;
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let id_col = resolve_id_column(&names)?;
    let sample_ids = extract_string_column(&df, &id_col)?;

    let snp_ids: Vec<String> = names
        .iter()
        .filter(|n| **n != id_col)
        .filter(|n| !PLINK_RAW_META.iter().any(|m| n.eq_ignore_ascii_case(m)))
        .cloned()
        .collect();
    if snp_ids.is_empty() {
        return Err(PrsError::InvalidArgument(format!(
            "genotype file {} has no SNP columns",
            path.display()
        ))
        .into());
    }

    let mut dosages = Array2::<f64>::from_elem((df.height(), snp_ids.len()), f64::NAN);
    for (j, snp) in snp_ids.iter().enumerate() {
        let values = extract_f64_column(&df, snp)?;
        for (i, v) in values.into_iter().enumerate() {
            dosages[[i, j]] = v;
        }
    }

    Ok(GenotypeMatrix {
        sample_ids,
        snp_ids,
        dosages,
    })
}

pub fn read_genotype_phenotype(path: &Path) -> Result<Option<HashMap<String, f64>>> {
    let df = read_table(path)?;
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let Some(pheno_col) = names.iter().find(|n| n.eq_ignore_ascii_case("PHENOTYPE")) else {
        return Ok(None);
    };
    let id_col = resolve_id_column(&names)?;
    let ids = extract_string_column(&df, &id_col)?;
    let values = extract_f64_column(&df, pheno_col)?;
    Ok(Some(ids.into_iter().zip(values).collect()))
}

pub fn read_variants(path: &Path) -> Result<Vec<VariantAlleles>> {
    let mut df = read_table(path).with_context(|| format!("read variants {}", path.display()))?;
    let headers: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let map = resolve_column_map(&headers, &ColumnMapConfig::variants(&path.display().to_string()))?;
    df.set_column_names(&map.headers)?;
    df = ensure_utf8(df, &["SNP", "A1", "A2"])?;
    df = uppercase_alleles(df)?;

    let snp = extract_string_column(&df, "SNP")?;
    let a1 = extract_string_column(&df, "A1")?;
    let a2 = extract_string_column(&df, "A2")?;
    Ok(snp
        .into_iter()
        .zip(a1)
        .zip(a2)
        .map(|((snp, a1), a2)| VariantAlleles { snp, a1, a2 })
        .collect())
}

pub fn read_phenotype(path: &Path, column: Option<&str>) -> Result<HashMap<String, f64>> {
    let df = read_table(path).with_context(|| format!("read phenotype {}", path.display()))?;
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let id_col = resolve_id_column(&names)?;
    let value_col = match column {
        Some(name) => names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| PrsError::MissingColumn(format!("{name} in {}", path.display())))?,
        None => names
            .iter()
            .find(|n| **n != id_col && !n.eq_ignore_ascii_case("FID"))
            .cloned()
            .ok_or_else(|| {
                PrsError::MissingColumn(format!("phenotype value in {}", path.display()))
            })?,
    };
    let ids = extract_string_column(&df, &id_col)?;
    let values = extract_f64_column(&df, &value_col)?;
    Ok(ids.into_iter().zip(values).collect())
}

pub fn write_dataframe(df: &DataFrame, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut df = df.clone();
    CsvWriter::new(&mut writer)
        .with_separator(b'\t')
        .finish(&mut df)?;
    writer.flush()?;
    Ok(())
}
