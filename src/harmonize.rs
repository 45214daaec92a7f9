use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::error::PrsError;
use crate::logging::RunLog;
use crate::matrix::{impute_missing_with_mean, monomorphic_columns, select_columns, standardize_columns};
use crate::types::{
    AmbiguousPolicy, GenotypeMatrix, HarmonizeReport, HarmonizedData, SumstatRecord,
    VariantAlleles,
};
use crate::utils::{allele_sets_intersect, complement, is_strand_ambiguous, same_allele_set};

#[derive(Debug, Clone, Copy, Default)]
pub struct HarmonizeConfig {
    pub ambiguous: AmbiguousPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Alignment {
    Aligned {
        record: SumstatRecord,
        flipped: bool,
        reversed: bool,
    },
    Mismatch,
}

// A pair disjoint from the genotype pair is complemented first (no sign
// change); a pair left in the opposite order is a reversal.
pub fn align_record(counted: &str, other: &str, record: &SumstatRecord) -> Alignment {
    let genotype = (counted, other);
    let mut a1 = record.a1.clone();
    let mut a2 = record.a2.clone();
    let mut flipped = false;

    if !allele_sets_intersect(genotype, (&a1, &a2)) {
        a1 = complement(&a1).to_string();
        a2 = complement(&a2).to_string();
        flipped = true;
    }

    if !same_allele_set(genotype, (&a1, &a2)) {
        return Alignment::Mismatch;
    }

    let mut aligned = record.clone();
    let reversed = a1 != counted;
    if reversed {
        aligned.beta = -aligned.beta;
    }
    aligned.a1 = counted.to_string();
    aligned.a2 = other.to_string();

    Alignment::Aligned {
        record: aligned,
        flipped,
        reversed,
    }
}

enum ColumnMatch<'a> {
    Variant {
        snp: &'a str,
        counted: &'a str,
        other: &'a str,
    },
    UnknownSuffix,
    Unknown,
}

// plink raw columns are named <id>_<counted allele>.
fn resolve_column<'a>(
    column: &'a str,
    variants: &HashMap<&'a str, &'a VariantAlleles>,
) -> ColumnMatch<'a> {
    if let Some(v) = variants.get(column) {
        return ColumnMatch::Variant {
            snp: v.snp.as_str(),
            counted: v.a1.as_str(),
            other: v.a2.as_str(),
        };
    }
    let Some((id, suffix)) = column.rsplit_once('_') else {
        return ColumnMatch::Unknown;
    };
    let Some(v) = variants.get(id) else {
        return ColumnMatch::Unknown;
    };
    let suffix = suffix.to_ascii_uppercase();
    if suffix == v.a1 {
        ColumnMatch::Variant {
            snp: v.snp.as_str(),
            counted: v.a1.as_str(),
            other: v.a2.as_str(),
        }
    } else if suffix == v.a2 {
        ColumnMatch::Variant {
            snp: v.snp.as_str(),
            counted: v.a2.as_str(),
            other: v.a1.as_str(),
        }
    } else {
        ColumnMatch::UnknownSuffix
    }
}

pub fn harmonize(
    genotypes: &GenotypeMatrix,
    variants: &[VariantAlleles],
    sumstats: &[SumstatRecord],
    config: &HarmonizeConfig,
    log: &mut RunLog,
) -> Result<HarmonizedData> {
    if genotypes.dosages.ncols() != genotypes.snp_ids.len() {
        return Err(PrsError::InvalidArgument(format!(
            "genotype matrix has {} columns but {} SNP ids",
            genotypes.dosages.ncols(),
            genotypes.snp_ids.len()
        ))
        .into());
    }
    if genotypes.dosages.nrows() < 2 {
        return Err(PrsError::InvalidArgument(
            "at least two genotyped samples are required".to_string(),
        )
        .into());
    }

    let variant_map: HashMap<&str, &VariantAlleles> =
        variants.iter().map(|v| (v.snp.as_str(), v)).collect();
    let mut sumstat_map: HashMap<&str, &SumstatRecord> = HashMap::new();
    for r in sumstats {
        sumstat_map.entry(r.snp.as_str()).or_insert(r);
    }

    let mut report = HarmonizeReport {
        genotype_snps: genotypes.snp_ids.len(),
        sumstats_snps: sumstats.len(),
        ..HarmonizeReport::default()
    };

    let mut columns = Vec::new();
    let mut records = Vec::new();
    let mut without_alleles = 0usize;
    let mut used: HashSet<&str> = HashSet::new();

    for (col_idx, column) in genotypes.snp_ids.iter().enumerate() {
        let (snp, counted, other) = match resolve_column(column, &variant_map) {
            ColumnMatch::Variant {
                snp,
                counted,
                other,
            } => (snp, counted, other),
            ColumnMatch::UnknownSuffix => {
                report.unresolved_columns += 1;
                continue;
            }
            ColumnMatch::Unknown => {
                if sumstat_map.contains_key(column.as_str()) {
                    without_alleles += 1;
                }
                continue;
            }
        };
        let Some(record) = sumstat_map.get(snp) else {
            continue;
        };
        if !used.insert(snp) {
            report.duplicate_columns += 1;
            continue;
        }
        report.overlap += 1;

        if is_strand_ambiguous(counted, other) {
            report.ambiguous += 1;
            if config.ambiguous == AmbiguousPolicy::Drop {
                continue;
            }
        }

        match align_record(counted, other, record) {
            Alignment::Aligned {
                record,
                flipped,
                reversed,
            } => {
                report.flipped += usize::from(flipped);
                report.reversed += usize::from(reversed);
                columns.push(col_idx);
                records.push(record);
            }
            Alignment::Mismatch => report.allele_mismatch += 1,
        }
    }

    if without_alleles > 0 {
        log.warn(&format!(
            "{without_alleles} genotyped SNP(s) found in the summary statistics have no allele information and were skipped"
        ))?;
    }
    if report.unresolved_columns > 0 {
        log.warn(&format!(
            "{} genotype column(s) with a suffix that is not an allele of the variant were skipped",
            report.unresolved_columns
        ))?;
    }
    if report.duplicate_columns > 0 {
        log.warn(&format!(
            "{} genotype column(s) map to an already used SNP; only the first was kept",
            report.duplicate_columns
        ))?;
    }
    if report.overlap == 0 {
        log.warn("0 SNPs overlap between genotypes and summary statistics")?;
        return Err(PrsError::NoOverlap {
            genotype: report.genotype_snps,
            sumstats: report.sumstats_snps,
        }
        .into());
    }

    log.line(&format!(
        "{} SNPs overlap between genotypes ({}) and summary statistics ({})",
        report.overlap, report.genotype_snps, report.sumstats_snps
    ))?;
    log.line(&format!("Number of flipped SNPs: {}", report.flipped))?;
    log.line(&format!("Number of reversed SNPs: {}", report.reversed))?;
    if report.ambiguous > 0 {
        let action = match config.ambiguous {
            AmbiguousPolicy::Drop => "removed",
            AmbiguousPolicy::Keep => "kept without strand resolution",
        };
        log.warn(&format!(
            "{} strand-ambiguous SNP(s) (A/T or C/G) {action}",
            report.ambiguous
        ))?;
    }
    if report.allele_mismatch > 0 {
        log.line(&format!(
            "{} SNP(s) removed due to allele mismatch with the genotype coding",
            report.allele_mismatch
        ))?;
    }

    let mut dosages = select_columns(&genotypes.dosages, &columns);
    let imputed = impute_missing_with_mean(&mut dosages);
    if imputed > 0 {
        log.line(&format!(
            "{imputed} missing genotype call(s) imputed with the SNP mean dosage"
        ))?;
    }

    let monomorphic = monomorphic_columns(&dosages);
    if !monomorphic.is_empty() {
        let ids: Vec<&str> = monomorphic
            .iter()
            .map(|&j| records[j].snp.as_str())
            .collect();
        log.warn(&format!(
            "{} monomorphic SNP(s) removed before standardization: {}",
            monomorphic.len(),
            ids.join(", ")
        ))?;
        report.monomorphic = monomorphic.len();
        let keep: Vec<usize> = (0..records.len())
            .filter(|j| !monomorphic.contains(j))
            .collect();
        dosages = select_columns(&dosages, &keep);
        records = keep.iter().map(|&j| records[j].clone()).collect();
    }

    if records.is_empty() {
        return Err(PrsError::NoSnpsRemaining(format!(
            "{} overlapping, {} ambiguous, {} mismatched, {} monomorphic",
            report.overlap, report.ambiguous, report.allele_mismatch, report.monomorphic
        ))
        .into());
    }

    let standardized = standardize_columns(&dosages)?;
    report.retained = records.len();
    log.line(&format!("{} SNPs retained after harmonization", report.retained))?;

    Ok(HarmonizedData {
        sample_ids: genotypes.sample_ids.clone(),
        sumstats: records,
        genotypes: standardized,
        report,
    })
}
