use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::error::{PrsError, Result};

pub const MONOMORPHIC_SD: f64 = 1e-12;

pub fn ensure_square(matrix: &Array2<f64>, name: &str) -> Result<()> {
    let (rows, cols) = matrix.dim();
    if rows == 0 {
        return Err(PrsError::InvalidArgument(format!("{name} must not be empty")));
    }
    if rows != cols {
        return Err(PrsError::InvalidArgument(format!(
            "{name} is {rows} x {cols}, expected a square matrix"
        )));
    }
    Ok(())
}

pub fn column_moments(column: ArrayView1<f64>) -> (f64, f64) {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in column.iter().filter(|v| v.is_finite()) {
        sum += v;
        count += 1;
    }
    if count == 0 {
        return (f64::NAN, 0.0);
    }
    let mean = sum / count as f64;
    let ss: f64 = column
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - mean) * (v - mean))
        .sum();
    (mean, (ss / count as f64).sqrt())
}

pub fn impute_missing_with_mean(matrix: &mut Array2<f64>) -> usize {
    let mut imputed = 0usize;
    for mut column in matrix.axis_iter_mut(Axis(1)) {
        let (mean, _) = column_moments(column.view());
        if !mean.is_finite() {
            continue;
        }
        for v in column.iter_mut().filter(|v| !v.is_finite()) {
            *v = mean;
            imputed += 1;
        }
    }
    imputed
}

pub fn monomorphic_columns(matrix: &Array2<f64>) -> Vec<usize> {
    matrix
        .axis_iter(Axis(1))
        .enumerate()
        .filter(|(_, column)| column_moments(column.view()).1 <= MONOMORPHIC_SD)
        .map(|(idx, _)| idx)
        .collect()
}

pub fn standardize_columns(matrix: &Array2<f64>) -> Result<Array2<f64>> {
    let mut out = matrix.clone();
    for (idx, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
        let (mean, sd) = column_moments(column.view());
        if sd <= MONOMORPHIC_SD || !mean.is_finite() {
            return Err(PrsError::ZeroVariance { column: idx });
        }
        column.mapv_inplace(|v| (v - mean) / sd);
    }
    Ok(out)
}

pub fn ld_matrix(standardized: &Array2<f64>) -> Result<Array2<f64>> {
    let n = standardized.nrows();
    if n == 0 {
        return Err(PrsError::InvalidArgument(
            "cannot compute LD from zero samples".to_string(),
        ));
    }
    let gram = standardized.t().dot(standardized) / n as f64;
    Ok((&gram + &gram.t()) * 0.5)
}

pub fn select_columns(matrix: &Array2<f64>, columns: &[usize]) -> Array2<f64> {
    matrix.select(Axis(1), columns)
}

pub fn polygenic_score(standardized: &Array2<f64>, weights: &Array1<f64>) -> Array1<f64> {
    standardized.dot(weights)
}
