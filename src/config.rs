//! Analysis configuration
//!
//! Every threshold the diagnostic engine compares against lives here, so the
//! defaults can be overridden per fleet from a TOML file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Base priority of a process running at "Normal" priority class
pub const NORMAL_BASE_PRIORITY: i64 = 8;

/// Errors for configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid target pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Thresholds and knobs for capture analysis
///
/// # Example
/// ```
/// use contend::config::AnalysisConfig;
///
/// let config = AnalysisConfig::default();
/// assert_eq!(config.critical_threshold, 0.7);
/// assert_eq!(config.expected_base_priority, 8);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Contention score above which a host is Critical
    pub critical_threshold: f64,

    /// Contention score above which a host is Warning
    pub warning_threshold: f64,

    /// Kernel/User ratio above which filter-driver interference is flagged
    pub kernel_user_threshold: f64,

    /// Memory growth in MB per interval above which a leak is suspected
    pub leak_threshold_mb: f64,

    /// Minimum samples before a memory slope is computed
    ///
    /// Shorter series report a slope of 0.
    pub min_slope_samples: usize,

    /// Expected base priority for the target workload
    pub expected_base_priority: i64,

    /// Average sampling interval (seconds) above which fidelity is low
    pub low_fidelity_seconds: f64,

    /// Lines of decoder output attached to a conversion failure
    pub diagnostic_lines: usize,

    /// Regex matched against process instance labels to find the workload
    pub target_pattern: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            critical_threshold: 0.7,
            warning_threshold: 0.4,
            kernel_user_threshold: 0.3,
            leak_threshold_mb: 0.5,
            min_slope_samples: 10,
            expected_base_priority: NORMAL_BASE_PRIORITY,
            low_fidelity_seconds: 15.0,
            diagnostic_lines: 10,
            target_pattern: "(?i)^sqlservr".to_string(),
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a TOML file; absent keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Compile the target workload pattern
    pub fn target_regex(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.target_pattern).map_err(|source| ConfigError::Pattern {
            pattern: self.target_pattern.clone(),
            source,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("critical_threshold", self.critical_threshold),
            ("warning_threshold", self.warning_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be in [-1, 1], got {}",
                    name, value
                )));
            }
        }

        if self.warning_threshold > self.critical_threshold {
            return Err(ConfigError::Invalid(format!(
                "warning_threshold ({}) must not exceed critical_threshold ({})",
                self.warning_threshold, self.critical_threshold
            )));
        }

        if self.kernel_user_threshold < 0.0 || self.leak_threshold_mb < 0.0 {
            return Err(ConfigError::Invalid(
                "kernel_user_threshold and leak_threshold_mb must be non-negative".to_string(),
            ));
        }

        if self.min_slope_samples < 2 {
            return Err(ConfigError::Invalid(format!(
                "min_slope_samples must be >= 2 for a regression, got {}",
                self.min_slope_samples
            )));
        }

        if self.low_fidelity_seconds <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "low_fidelity_seconds must be positive, got {}",
                self.low_fidelity_seconds
            )));
        }

        self.target_regex()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert_eq!(config.warning_threshold, 0.4);
        assert_eq!(config.kernel_user_threshold, 0.3);
        assert_eq!(config.leak_threshold_mb, 0.5);
        assert_eq!(config.min_slope_samples, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalysisConfig::from_toml("critical_threshold = 0.8\n").unwrap();
        assert_eq!(config.critical_threshold, 0.8);
        assert_eq!(config.warning_threshold, 0.4);
        assert_eq!(config.expected_base_priority, NORMAL_BASE_PRIORITY);
    }

    #[test]
    fn test_toml_target_pattern() {
        let config = AnalysisConfig::from_toml("target_pattern = \"^w3wp\"\n").unwrap();
        let re = config.target_regex().unwrap();
        assert!(re.is_match("w3wp#2"));
        assert!(!re.is_match("sqlservr"));
    }

    #[test]
    #[allow(clippy::field_reassign_with_default)]
    fn test_invalid_threshold_order() {
        let mut config = AnalysisConfig::default();
        config.warning_threshold = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    #[allow(clippy::field_reassign_with_default)]
    fn test_invalid_min_slope_samples() {
        let mut config = AnalysisConfig::default();
        config.min_slope_samples = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = AnalysisConfig::from_toml("target_pattern = \"(unclosed\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Pattern { .. }));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(matches!(
            AnalysisConfig::from_toml("critical_threshold = [").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }
}
