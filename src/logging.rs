// ============================================================================
// LOGGING & TRACING
// ============================================================================
// `logging.level` is an `EnvFilter` directive string, so it can be a bare
// level (`info`) or per-stage targets such as
// `warn,statsd::parser=debug,statsd::receiver=trace`. `RUST_LOG` wins when
// set.
// ============================================================================

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ConfigError, StatsdError, StatsdResult};

/// Output layout of the fmt subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Parse `logging.level` into a filter
pub fn level_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(level).map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> StatsdResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };
    let format = LogFormat::from_name(&config.format).ok_or_else(|| {
        ConfigError::invalid_value("logging.format", format!("unknown format '{}'", config.format))
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(config.source_location)
        .with_line_number(config.source_location);

    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().with_ansi(config.colors).try_init(),
        LogFormat::Pretty => builder.pretty().with_ansi(config.colors).try_init(),
    };
    installed.map_err(|e| StatsdError::Internal(format!("Failed to install logger: {}", e)))?;

    info!(
        target: "statsd::init",
        level = %config.level,
        format = ?format,
        "Logging initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!(LogFormat::from_name("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::from_name("compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::from_name("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::from_name("xml"), None);
    }

    #[test]
    fn test_per_stage_directives() {
        assert!(level_filter("info").is_ok());
        assert!(level_filter("warn,statsd::parser=debug,statsd::receiver=trace").is_ok());
    }

    #[test]
    fn test_bad_directive_rejected() {
        let err = level_filter("statsd::parser=loud").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
