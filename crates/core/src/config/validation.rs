use crate::{AnalyzerError, AnalyzerResult};

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> AnalyzerResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> AnalyzerResult<()> {
        if value.trim().is_empty() {
            return Err(AnalyzerError::Configuration(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a count is positive and not above `max`
    pub fn validate_count(count: usize, field_name: &str, max: usize) -> AnalyzerResult<()> {
        if count == 0 {
            return Err(AnalyzerError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > max {
            return Err(AnalyzerError::Configuration(format!(
                "{field_name} must be less than or equal to {max}"
            )));
        }
        Ok(())
    }

    /// Validate that an interval or timeout is non-zero
    pub fn validate_positive_millis(value: u64, field_name: &str) -> AnalyzerResult<()> {
        if value == 0 {
            return Err(AnalyzerError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        Ok(())
    }

    /// Validate that a ratio lies in (0, 1]
    pub fn validate_ratio(value: f64, field_name: &str) -> AnalyzerResult<()> {
        if !(value > 0.0 && value <= 1.0) {
            return Err(AnalyzerError::Configuration(format!(
                "{field_name} must be within (0, 1], got {value}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("test", "field").is_ok());
        assert!(ValidationUtils::validate_not_empty("", "field").is_err());
        assert!(ValidationUtils::validate_not_empty("   ", "field").is_err());
    }

    #[test]
    fn test_validate_count() {
        assert!(ValidationUtils::validate_count(10, "test", 100).is_ok());
        assert!(ValidationUtils::validate_count(100, "test", 100).is_ok());
        assert!(ValidationUtils::validate_count(0, "test", 100).is_err());
        assert!(ValidationUtils::validate_count(101, "test", 100).is_err());
    }

    #[test]
    fn test_validate_ratio() {
        assert!(ValidationUtils::validate_ratio(0.8, "ratio").is_ok());
        assert!(ValidationUtils::validate_ratio(1.0, "ratio").is_ok());
        assert!(ValidationUtils::validate_ratio(0.0, "ratio").is_err());
        assert!(ValidationUtils::validate_ratio(1.5, "ratio").is_err());
        assert!(ValidationUtils::validate_ratio(f64::NAN, "ratio").is_err());
    }
}
