// ============================================================================
// CONFIGURATION SYSTEM
// ============================================================================
// Configuration management with:
// - TOML file parsing
// - Environment variable overrides (CEREBRO_STATSD_ prefix)
// - Validation
// - Defaults for a standard StatsD listener on :8125
// ============================================================================

use std::path::Path;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogFormat;
use crate::{
    DEFAULT_ADDRESS, DEFAULT_ALLOWED_PENDING_MESSAGES, DEFAULT_PERCENTILES,
    DEFAULT_PERCENTILE_LIMIT,
};

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "CEREBRO_STATSD_";

// ----------------------------------------------------------------------------
// Root Configuration
// ----------------------------------------------------------------------------

/// Root configuration for the StatsD engine and its host binary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsdConfig {
    /// Listener, queue and aggregation settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StatsdConfig {
    /// Load configuration from file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        config.service.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML string
    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.service.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service.validate()?;
        self.logging.validate()
    }

    /// Render the default configuration as TOML
    pub fn generate_default_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// Service Configuration
// ----------------------------------------------------------------------------

/// Settings consumed by [`crate::StatsdService`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// UDP listen address; `:port` binds all interfaces
    #[serde(default = "default_address")]
    pub address: String,

    /// Number of packets allowed to queue up between collections.
    /// When full, new packets are dropped.
    #[serde(default = "default_allowed_pending_messages")]
    pub allowed_pending_messages: usize,

    /// Percentiles computed for timings and histograms
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<u32>,

    /// Capacity of the per-field sample window used for percentiles
    #[serde(default = "default_percentile_limit")]
    pub percentile_limit: usize,

    /// Clear timings after each collection
    #[serde(default = "default_true")]
    pub delete_timings: bool,

    /// Clear gauges after each collection
    #[serde(default)]
    pub delete_gauges: bool,

    /// Clear counters after each collection
    #[serde(default)]
    pub delete_counters: bool,

    /// Clear sets after each collection
    #[serde(default)]
    pub delete_sets: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            allowed_pending_messages: default_allowed_pending_messages(),
            percentiles: default_percentiles(),
            percentile_limit: default_percentile_limit(),
            delete_timings: true,
            delete_gauges: false,
            delete_counters: false,
            delete_sets: false,
        }
    }
}

impl ServiceConfig {
    /// Config for a listener on the given address, everything else default
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Replace zero-valued sizes with their defaults
    pub fn normalize(&mut self) {
        if self.allowed_pending_messages == 0 {
            self.allowed_pending_messages = DEFAULT_ALLOWED_PENDING_MESSAGES;
        }
        if self.percentile_limit == 0 {
            self.percentile_limit = DEFAULT_PERCENTILE_LIMIT;
        }
    }

    /// Validate the service settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "service.address",
                "Listen address cannot be empty",
            ));
        }

        if self.allowed_pending_messages == 0 {
            return Err(ConfigError::invalid_value(
                "service.allowed_pending_messages",
                "Queue capacity must be at least 1",
            ));
        }

        if self.percentile_limit == 0 {
            return Err(ConfigError::invalid_value(
                "service.percentile_limit",
                "Percentile sample window must hold at least 1 value",
            ));
        }

        if let Some(p) = self.percentiles.iter().find(|p| **p > 100) {
            return Err(ConfigError::invalid_value(
                "service.percentiles",
                format!("Percentile {} is outside 0..=100", p),
            ));
        }

        Ok(())
    }

    /// Address in a form the socket layer accepts (`:8125` → `0.0.0.0:8125`)
    pub fn bind_address(&self) -> String {
        let address = self.address.trim();
        if address.starts_with(':') {
            format!("0.0.0.0{}", address)
        } else {
            address.to_string()
        }
    }
}

fn default_address() -> String {
    DEFAULT_ADDRESS.into()
}

fn default_allowed_pending_messages() -> usize {
    DEFAULT_ALLOWED_PENDING_MESSAGES
}

fn default_percentiles() -> Vec<u32> {
    DEFAULT_PERCENTILES.to_vec()
}

fn default_percentile_limit() -> usize {
    DEFAULT_PERCENTILE_LIMIT
}

fn default_true() -> bool {
    true
}

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives, e.g. `info` or `info,statsd::parser=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl LoggingConfig {
    /// Reject filter directives and formats the subscriber cannot use
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::logging::level_filter(&self.level)?;
        if LogFormat::from_name(&self.format).is_none() {
            return Err(ConfigError::invalid_value(
                "logging.format",
                format!("Unknown format '{}', expected pretty, compact or json", self.format),
            ));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = StatsdConfig::default();

        assert_eq!(config.service.address, ":8125");
        assert_eq!(config.service.allowed_pending_messages, 10_000);
        assert_eq!(config.service.percentile_limit, 1000);
        assert_eq!(config.service.percentiles, vec![90]);
        assert!(config.service.delete_timings);
        assert!(!config.service.delete_gauges);
        assert!(!config.service.delete_counters);
        assert!(!config.service.delete_sets);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_bind_address() {
        assert_eq!(ServiceConfig::default().bind_address(), "0.0.0.0:8125");
        assert_eq!(
            ServiceConfig::with_address("127.0.0.1:9125").bind_address(),
            "127.0.0.1:9125"
        );
    }

    #[test]
    fn test_from_str_partial() {
        let config = StatsdConfig::from_str(
            r#"
            [service]
            address = "127.0.0.1:9000"
            delete_gauges = true
            percentiles = [50, 99]
            "#,
        )
        .unwrap();

        assert_eq!(config.service.address, "127.0.0.1:9000");
        assert!(config.service.delete_gauges);
        assert!(config.service.delete_timings);
        assert_eq!(config.service.percentiles, vec![50, 99]);
        assert_eq!(config.service.allowed_pending_messages, 10_000);
    }

    #[test]
    fn test_zero_queue_capacity_is_normalized() {
        let config = StatsdConfig::from_str("[service]\nallowed_pending_messages = 0\n").unwrap();
        assert_eq!(config.service.allowed_pending_messages, 10_000);
    }

    #[test]
    fn test_invalid_percentile_rejected() {
        let err = StatsdConfig::from_str("[service]\npercentiles = [90, 150]\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_logging_settings_validated() {
        let config =
            StatsdConfig::from_str("[logging]\nlevel = \"warn,statsd::parser=debug\"\n").unwrap();
        assert_eq!(config.logging.level, "warn,statsd::parser=debug");

        let err = StatsdConfig::from_str("[logging]\nformat = \"xml\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "logging.format"));

        let err = StatsdConfig::from_str("[logging]\nlevel = \"statsd::parser=loud\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "logging.level"));
    }

    #[test]
    fn test_empty_address_rejected() {
        let config = ServiceConfig::with_address("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[service]\naddress = \"127.0.0.1:18125\"\n[logging]\nformat = \"json\"").unwrap();

        let config = StatsdConfig::load(file.path()).unwrap();
        assert_eq!(config.service.address, "127.0.0.1:18125");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_load_missing_file() {
        let err = StatsdConfig::load("/nonexistent/cerebro-statsd.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_generated_config_round_trips() {
        let text = StatsdConfig::generate_default_config();
        let config = StatsdConfig::from_str(&text).unwrap();
        assert_eq!(config, StatsdConfig::default());
    }
}
