use std::str::FromStr;

use ndarray::Array2;

use crate::error::PrsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmbiguousPolicy {
    #[default]
    Drop,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EffectScaling {
    #[default]
    ZScore,
    PerSample,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum InitStrategy {
    #[default]
    Zero,
    Infinitesimal { h2: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

impl FromStr for AmbiguousPolicy {
    type Err = PrsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "keep" => Ok(Self::Keep),
            other => Err(PrsError::Parse(format!(
                "Unknown ambiguous SNP policy: {other} (expected drop or keep)"
            ))),
        }
    }
}

impl FromStr for EffectScaling {
    type Err = PrsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "z" | "zscore" | "z-score" => Ok(Self::ZScore),
            "per-sample" | "per_sample" | "persample" => Ok(Self::PerSample),
            other => Err(PrsError::Parse(format!(
                "Unknown effect scaling: {other} (expected zscore or per-sample)"
            ))),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = PrsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(Self::Adam),
            "sgd" => Ok(Self::Sgd),
            other => Err(PrsError::Parse(format!(
                "Unknown optimizer: {other} (expected adam or sgd)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenotypeMatrix {
    pub sample_ids: Vec<String>,
    pub snp_ids: Vec<String>,
    pub dosages: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantAlleles {
    pub snp: String,
    pub a1: String,
    pub a2: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SumstatRecord {
    pub snp: String,
    pub a1: String,
    pub a2: String,
    pub beta: f64,
    pub se: f64,
    pub n: f64,
    pub p: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarmonizeReport {
    pub genotype_snps: usize,
    pub sumstats_snps: usize,
    pub overlap: usize,
    pub flipped: usize,
    pub reversed: usize,
    pub ambiguous: usize,
    pub allele_mismatch: usize,
    pub unresolved_columns: usize,
    pub duplicate_columns: usize,
    pub monomorphic: usize,
    pub retained: usize,
}

#[derive(Debug, Clone)]
pub struct HarmonizedData {
    pub sample_ids: Vec<String>,
    pub sumstats: Vec<SumstatRecord>,
    pub genotypes: Array2<f64>,
    pub report: HarmonizeReport,
}

impl HarmonizedData {
    pub fn n_snps(&self) -> usize {
        self.sumstats.len()
    }

    pub fn snp_ids(&self) -> Vec<&str> {
        self.sumstats.iter().map(|r| r.snp.as_str()).collect()
    }
}
