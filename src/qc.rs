use std::path::Path;

use crate::error::{PrsError, Result};

pub fn check_non_empty<T>(values: &[T], name: &str) -> Result<()> {
    if values.is_empty() {
        return Err(PrsError::InvalidArgument(format!(
            "{name} must contain at least one value"
        )));
    }
    Ok(())
}

pub fn check_equal_length(
    left_len: usize,
    right_len: usize,
    left_name: &str,
    right_name: &str,
) -> Result<()> {
    if left_len != right_len {
        return Err(PrsError::InvalidArgument(format!(
            "Length of {left_name} ({left_len}) and {right_name} ({right_len}) should be equal"
        )));
    }
    Ok(())
}

pub fn check_positive(value: f64, name: &str) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(PrsError::InvalidArgument(format!(
            "Value of {name} should be finite and above 0, got {value}"
        )));
    }
    Ok(())
}

pub fn check_range_f64(value: f64, min: f64, max: f64, exclusive: bool, name: &str) -> Result<()> {
    if !value.is_finite() {
        return Err(PrsError::InvalidArgument(format!(
            "Value of {name} should be finite"
        )));
    }
    let below = if exclusive { value <= min } else { value < min };
    let above = if exclusive { value >= max } else { value > max };
    if below {
        return Err(PrsError::InvalidArgument(format!(
            "Value of {name} should be above {min}, got {value}"
        )));
    }
    if above {
        return Err(PrsError::InvalidArgument(format!(
            "Value of {name} should be below {max}, got {value}"
        )));
    }
    Ok(())
}

pub fn check_file_exists(path: &Path, name: &str) -> Result<()> {
    if !path.exists() {
        return Err(PrsError::InvalidArgument(format!(
            "File {path:?} passed to {name} does not exist"
        )));
    }
    Ok(())
}
