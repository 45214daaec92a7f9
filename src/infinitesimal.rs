use ndarray::{Array1, Array2};
use ndarray_linalg::{FactorizeC, SolveC, UPLO};

use crate::error::{PrsError, Result};
use crate::matrix::ensure_square;

const MIN_RELATIVE_PIVOT: f64 = 1e-10;

// (R + M / (N h2) I)^-1 z
pub fn infinitesimal_init(
    ld: &Array2<f64>,
    z: &Array1<f64>,
    n_gwas: f64,
    h2: f64,
) -> Result<Array1<f64>> {
    ensure_square(ld, "LD matrix")?;
    if ld.nrows() != z.len() {
        return Err(PrsError::InvalidArgument(format!(
            "LD matrix has {} rows but {} effects were given",
            ld.nrows(),
            z.len()
        )));
    }
    if !n_gwas.is_finite() || n_gwas <= 0.0 {
        return Err(PrsError::InvalidArgument(format!(
            "GWAS sample size must be positive for infinitesimal initialization, got {n_gwas}"
        )));
    }
    if !h2.is_finite() || h2 <= 0.0 || h2 > 1.0 {
        return Err(PrsError::InvalidArgument(format!(
            "h2 must lie in (0, 1], got {h2}"
        )));
    }

    let m = z.len() as f64;
    let shrinkage = m / (n_gwas * h2);
    let mut system = ld.clone();
    system.diag_mut().mapv_inplace(|d| d + shrinkage);

    let factorized = system
        .factorizec(UPLO::Lower)
        .map_err(|e| PrsError::SingularMatrix(e.to_string()))?;
    for (i, (&l, &d)) in factorized
        .factor
        .diag()
        .iter()
        .zip(system.diag().iter())
        .enumerate()
    {
        if l * l < MIN_RELATIVE_PIVOT * d {
            return Err(PrsError::SingularMatrix(format!(
                "system is numerically singular at SNP {i}"
            )));
        }
    }
    let solution = factorized
        .solvec(z)
        .map_err(|e| PrsError::SingularMatrix(e.to_string()))?;
    if solution.iter().any(|v| !v.is_finite()) {
        return Err(PrsError::SingularMatrix(
            "solution contains non-finite values".to_string(),
        ));
    }
    Ok(solution)
}
