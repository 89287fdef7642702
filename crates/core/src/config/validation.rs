use crate::{AgentError, AgentResult};

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> AgentResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> AgentResult<()> {
        if value.trim().is_empty() {
            return Err(AgentError::Configuration(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a timeout or interval is positive and bounded
    pub fn validate_seconds(seconds: u64, field_name: &str, max: u64) -> AgentResult<()> {
        if seconds == 0 {
            return Err(AgentError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if seconds > max {
            return Err(AgentError::Configuration(format!(
                "{field_name} must be less than or equal to {max}"
            )));
        }
        Ok(())
    }

    /// Validate that a URL has a valid format
    pub fn validate_url(url: &str, field_name: &str) -> AgentResult<()> {
        Self::validate_not_empty(url, field_name)?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AgentError::Configuration(format!(
                "{field_name} must be an http(s) URL"
            )));
        }
        Ok(())
    }

    /// Validate that a value is one of the allowed options
    pub fn validate_one_of(value: &str, field_name: &str, allowed: &[&str]) -> AgentResult<()> {
        if !allowed.contains(&value) {
            return Err(AgentError::Configuration(format!(
                "Invalid {field_name}: {value}. Valid options: {allowed:?}"
            )));
        }
        Ok(())
    }
}
