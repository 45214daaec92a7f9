use std::collections::{HashMap, HashSet};

use crate::error::{PrsError, Result};

#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub headers: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ColumnMapConfig {
    pub userprovided: HashMap<String, String>,
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub filename: Option<String>,
}

impl ColumnMapConfig {
    pub fn sumstats(filename: &str, userprovided: HashMap<String, String>) -> Self {
        Self {
            userprovided,
            required: ["SNP", "A1", "A2", "EFFECT"].map(String::from).to_vec(),
            optional: ["SE", "N", "P"].map(String::from).to_vec(),
            filename: Some(filename.to_string()),
        }
    }

    pub fn variants(filename: &str) -> Self {
        Self {
            userprovided: HashMap::new(),
            required: ["SNP", "A1", "A2"].map(String::from).to_vec(),
            optional: Vec::new(),
            filename: Some(filename.to_string()),
        }
    }
}

pub fn normalize_headers(headers: &[String]) -> Vec<String> {
    headers
        .iter()
        .map(|h| h.trim().to_ascii_uppercase())
        .collect()
}

fn synonyms(canonical: &str) -> &'static [&'static str] {
    match canonical {
        "SNP" => &[
            "SNP",
            "SNPID",
            "RSID",
            "RS_NUMBER",
            "MARKERNAME",
            "ID",
            "SNP_ID",
            "VARIANT_ID",
            "VARIANTID",
            "RS_ID",
        ],
        "A1" => &[
            "A1",
            "ALLELE1",
            "EFFECT_ALLELE",
            "INC_ALLELE",
            "EA",
            "COUNTED",
        ],
        "A2" => &[
            "A2",
            "ALLELE2",
            "ALLELE0",
            "OTHER_ALLELE",
            "NON_EFFECT_ALLELE",
            "DEC_ALLELE",
            "OA",
            "NEA",
            "ALT",
            "A0",
        ],
        "EFFECT" => &[
            "BETA",
            "B",
            "EFFECT",
            "EFFECTS",
            "LOG_ODDS",
            "LOGOR",
            "EST",
            "BETA1",
        ],
        "SE" => &[
            "SE",
            "STDERR",
            "SEBETA",
            "STDERRLOGOR",
            "STANDARD_ERROR",
            "STANDARDERROR",
        ],
        "N" => &["N", "NMISS", "N_COMPLETE_SAMPLES", "TOTALN", "TOTALSAMPLESIZE", "OBS_CT"],
        "P" => &[
            "P",
            "PVALUE",
            "PVAL",
            "P_VALUE",
            "P-VALUE",
            "P.VALUE",
            "P_VAL",
            "WALD_P",
        ],
        _ => &[],
    }
}

fn full_name(canonical: &str) -> &'static str {
    match canonical {
        "SNP" => "rs-id",
        "A1" => "effect allele",
        "A2" => "other allele",
        "EFFECT" => "beta or effect",
        "SE" => "standard error",
        "N" => "sample size",
        "P" => "P-value",
        _ => "column",
    }
}

pub fn resolve_column_map(headers: &[String], config: &ColumnMapConfig) -> Result<ColumnMap> {
    let mut warnings = Vec::new();
    let mut info = Vec::new();
    let mut headers = normalize_headers(headers);

    let filename = config
        .filename
        .clone()
        .unwrap_or_else(|| "<unknown>".to_string());

    if headers.iter().any(|h| h == "REF") && headers.iter().any(|h| h == "ALT") {
        info.push(format!(
            "Found REF and ALT columns in {filename}. REF will be interpreted as A1 and ALT as A2."
        ));
        for h in headers.iter_mut() {
            if h == "REF" {
                *h = "A1".to_string();
            }
        }
    }

    let user_map: HashMap<String, String> = config
        .userprovided
        .iter()
        .map(|(k, v)| (k.to_ascii_uppercase(), v.to_ascii_uppercase()))
        .collect();

    let required: HashSet<String> = config
        .required
        .iter()
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let canonicals = config.required.iter().chain(config.optional.iter());
    for canonical in canonicals {
        let canonical = canonical.to_ascii_uppercase();

        if let Some(user_col) = user_map.get(&canonical) {
            let mut matched = false;
            for h in headers.iter_mut() {
                if h == user_col {
                    *h = canonical.clone();
                    matched = true;
                }
            }
            if matched {
                info.push(format!(
                    "Interpreting the {user_col} column as the {canonical} column, as requested."
                ));
                continue;
            }
            warnings.push(format!(
                "Requested column {user_col} for {canonical} not found in {filename}."
            ));
        }

        if headers.iter().any(|h| *h == canonical) {
            continue;
        }

        let syns = synonyms(&canonical);
        let mut matched_cols = Vec::new();
        for h in headers.iter_mut() {
            if syns.contains(&h.as_str()) {
                matched_cols.push(h.clone());
                *h = canonical.clone();
            }
        }
        if !matched_cols.is_empty() {
            info.push(format!(
                "Interpreting the {} column as the {canonical} column.",
                matched_cols.join(", ")
            ));
            continue;
        }

        if required.contains(&canonical) {
            return Err(PrsError::MissingColumn(format!(
                "{canonical} ({}) in {filename}",
                full_name(&canonical)
            )));
        }
        warnings.push(format!(
            "Cannot find {} column; try renaming it to {canonical} in {filename}.",
            full_name(&canonical)
        ));
    }

    for canonical in config.required.iter().chain(config.optional.iter()) {
        let canonical = canonical.to_ascii_uppercase();
        let count = headers.iter().filter(|h| **h == canonical).count();
        if count > 1 {
            return Err(PrsError::InvalidArgument(format!(
                "Multiple columns interpreted as {}; rename the one you don't want interpreted as {canonical} in {filename}.",
                full_name(&canonical)
            )));
        }
    }

    Ok(ColumnMap {
        headers,
        warnings,
        info,
    })
}
