//! Parameter validation for filter constructors

use crate::common::{FilterError, Result};

/// Validate that a capacity is positive
pub fn validate_capacity(capacity: u64) -> Result<()> {
    if capacity == 0 {
        return Err(FilterError::InvalidConfig {
            param: "capacity",
            value: capacity.to_string(),
            constraint: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}

/// Validate that a value is a valid probability (0.0 < p < 1.0)
///
/// Used for the error rate and the error tightening ratio.
pub fn validate_probability(value: f64, param: &'static str) -> Result<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(FilterError::InvalidConfig {
            param,
            value: value.to_string(),
            constraint: "must be in range (0.0, 1.0) (exclusive)".to_string(),
        });
    }
    Ok(())
}

/// Validate that a duration in seconds is positive and finite
pub fn validate_duration(value: f64, param: &'static str) -> Result<()> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(FilterError::InvalidConfig {
            param,
            value: value.to_string(),
            constraint: "must be a positive number of seconds".to_string(),
        });
    }
    Ok(())
}

/// Validate the fill-factor pair of a scaling filter
///
/// `max_fill_factor` must lie in (0, 1]; `min_fill_factor`, when present,
/// must lie strictly between 0 and `max_fill_factor`.
pub fn validate_fill_factors(min_fill_factor: Option<f64>, max_fill_factor: f64) -> Result<()> {
    if !(max_fill_factor > 0.0 && max_fill_factor <= 1.0) {
        return Err(FilterError::InvalidConfig {
            param: "max_fill_factor",
            value: max_fill_factor.to_string(),
            constraint: "must be in range (0.0, 1.0]".to_string(),
        });
    }
    if let Some(min) = min_fill_factor {
        if !(min > 0.0 && min < max_fill_factor) {
            return Err(FilterError::InvalidConfig {
                param: "min_fill_factor",
                value: min.to_string(),
                constraint: format!("must be in range (0.0, {max_fill_factor})"),
            });
        }
    }
    Ok(())
}

/// Validate an optional growth factor (must be positive when present)
pub fn validate_growth_factor(growth_factor: Option<f64>) -> Result<()> {
    if let Some(growth) = growth_factor {
        if !(growth > 0.0 && growth.is_finite()) {
            return Err(FilterError::InvalidConfig {
                param: "growth_factor",
                value: growth.to_string(),
                constraint: "must be positive when set".to_string(),
            });
        }
    }
    Ok(())
}
