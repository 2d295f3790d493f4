use std::path::Path;

use serde::Deserialize;

use crate::error::{CommuneError, Result};

/// Main configuration structure for Commune
///
/// Every field has a documented default; a config file only needs to
/// name the options it overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Quota assigned to tenants created without an explicit quota (default: 10 MiB)
    #[serde(default = "default_tenant_quota_bytes")]
    pub tenant_default_quota_bytes: u64,
    /// Payloads below this size are stored raw without attempting compression (default: 1 KiB)
    #[serde(default = "default_compression_threshold_bytes")]
    pub compression_threshold_bytes: u64,
    /// Utilization percentage that triggers eviction after a store (default: 95.0)
    #[serde(default = "default_high_water_mark_percent")]
    pub high_water_mark_percent: f64,
    /// Utilization percentage at which eviction stops (default: 80.0)
    #[serde(default = "default_low_water_mark_percent")]
    pub low_water_mark_percent: f64,
    /// Upper bound on evictions per triggering store, guards against
    /// pathological configurations (default: 1000)
    #[serde(default = "default_max_eviction_attempts")]
    pub max_eviction_attempts: usize,
    /// Time budget for the external embedding call during store (default: 2000 ms)
    #[serde(default = "default_embedding_timeout_ms")]
    pub embedding_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tenant_default_quota_bytes: default_tenant_quota_bytes(),
            compression_threshold_bytes: default_compression_threshold_bytes(),
            high_water_mark_percent: default_high_water_mark_percent(),
            low_water_mark_percent: default_low_water_mark_percent(),
            max_eviction_attempts: default_max_eviction_attempts(),
            embedding_timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

fn default_tenant_quota_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_compression_threshold_bytes() -> u64 {
    1024
}

fn default_high_water_mark_percent() -> f64 {
    95.0
}

fn default_low_water_mark_percent() -> f64 {
    80.0
}

fn default_max_eviction_attempts() -> usize {
    1000
}

fn default_embedding_timeout_ms() -> u64 {
    2000
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| CommuneError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configured values are internally consistent
    pub fn validate(&self) -> Result<()> {
        if self.tenant_default_quota_bytes == 0 {
            return Err(CommuneError::Config(
                "tenant_default_quota_bytes must be positive".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.high_water_mark_percent)
            || self.high_water_mark_percent <= 0.0
        {
            return Err(CommuneError::Config(format!(
                "high_water_mark_percent must be in (0, 100], got {}",
                self.high_water_mark_percent
            )));
        }
        if self.low_water_mark_percent <= 0.0 || self.low_water_mark_percent > 100.0 {
            return Err(CommuneError::Config(format!(
                "low_water_mark_percent must be in (0, 100], got {}",
                self.low_water_mark_percent
            )));
        }
        if self.low_water_mark_percent >= self.high_water_mark_percent {
            return Err(CommuneError::Config(format!(
                "low_water_mark_percent ({}) must be below high_water_mark_percent ({})",
                self.low_water_mark_percent, self.high_water_mark_percent
            )));
        }
        if self.max_eviction_attempts == 0 {
            return Err(CommuneError::Config(
                "max_eviction_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tenant_default_quota_bytes, 10 * 1024 * 1024);
        assert_eq!(config.compression_threshold_bytes, 1024);
        assert_eq!(config.high_water_mark_percent, 95.0);
        assert_eq!(config.low_water_mark_percent, 80.0);
        assert_eq!(config.max_eviction_attempts, 1000);
        assert_eq!(config.embedding_timeout_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("compression_threshold_bytes = 4096").unwrap();
        assert_eq!(config.compression_threshold_bytes, 4096);
        assert_eq!(config.tenant_default_quota_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_inverted_water_marks_rejected() {
        let config = Config {
            high_water_mark_percent: 70.0,
            low_water_mark_percent: 90.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_quota_rejected() {
        let config = Config {
            tenant_default_quota_bytes: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
