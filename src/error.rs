// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// Error types for every stage of the StatsD pipeline:
// - Protocol errors are per-line and never abort a packet
// - Network errors are fatal only while binding
// - Configuration errors surface before anything is started
// ============================================================================

use std::path::PathBuf;

use compact_str::CompactString;
use thiserror::Error;

/// Result alias used throughout the crate
pub type StatsdResult<T> = Result<T, StatsdError>;

// ----------------------------------------------------------------------------
// Core Errors
// ----------------------------------------------------------------------------

/// The main error type for the StatsD engine.
/// All subsystem errors can be converted to this type.
#[derive(Error, Debug)]
pub enum StatsdError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StatsdError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            StatsdError::Config(_) => false,
            StatsdError::Network(e) => e.is_recoverable(),
            StatsdError::Parse(_) => true,
            StatsdError::Io(_) => true,
            StatsdError::Internal(_) => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            StatsdError::Config(_) => "config",
            StatsdError::Network(_) => "network",
            StatsdError::Parse(e) => e.kind(),
            StatsdError::Io(_) => "io",
            StatsdError::Internal(_) => "internal",
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Network Errors
// ----------------------------------------------------------------------------

/// Errors related to the UDP listener
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Failed to bind UDP listener on {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot resolve listen address '{address}': {message}")]
    AddressResolution { address: String, message: String },

    #[error("Socket error: {message}")]
    SocketError { message: String },
}

impl NetworkError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NetworkError::SocketError { .. })
    }
}

// ----------------------------------------------------------------------------
// Protocol Errors
// ----------------------------------------------------------------------------

/// A StatsD line that could not be decoded. The offending line is skipped,
/// the rest of the packet is still processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing ':' between bucket and value in line: {line}")]
    MissingValueSeparator { line: CompactString },

    #[error("missing '|' between value and type in line: {line}")]
    MissingTypeSeparator { line: CompactString },

    #[error("unsupported metric type '{mtype}' in line: {line}")]
    UnsupportedType { mtype: CompactString, line: CompactString },

    #[error("+/- values are only supported for gauges: {line}")]
    InvalidSign { line: CompactString },

    #[error("cannot parse value '{value}' in line: {line}")]
    InvalidValue { value: CompactString, line: CompactString },
}

impl ParseError {
    /// Short machine-friendly kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::MissingValueSeparator { .. } => "missing_value_separator",
            ParseError::MissingTypeSeparator { .. } => "missing_type_separator",
            ParseError::UnsupportedType { .. } => "unsupported_type",
            ParseError::InvalidSign { .. } => "invalid_sign",
            ParseError::InvalidValue { .. } => "invalid_value",
        }
    }

    /// The line that failed to parse
    pub fn line(&self) -> &str {
        match self {
            ParseError::MissingValueSeparator { line }
            | ParseError::MissingTypeSeparator { line }
            | ParseError::UnsupportedType { line, .. }
            | ParseError::InvalidSign { line }
            | ParseError::InvalidValue { line, .. } => line.as_str(),
        }
    }
}
