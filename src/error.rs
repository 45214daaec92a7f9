use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("missing column: {0}")]
    MissingColumn(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no SNPs shared between genotypes ({genotype} SNPs) and summary statistics ({sumstats} SNPs): overlap count is 0")]
    NoOverlap { genotype: usize, sumstats: usize },

    #[error("column {column} has zero variance and cannot be standardized")]
    ZeroVariance { column: usize },

    #[error("no SNPs remain after harmonization ({0})")]
    NoSnpsRemaining(String),

    #[error("closed-form initialization failed: {0}")]
    SingularMatrix(String),

    #[error("optimization diverged at step {step}: loss {loss}")]
    Diverged { step: usize, loss: f64 },

    #[error("polygenic score is constant; correlation with the phenotype is undefined")]
    UndefinedCorrelation,
}

pub type Result<T> = std::result::Result<T, PrsError>;
