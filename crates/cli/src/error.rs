//! CLI error types.

use std::fmt;

use bidprep_common::error::PipelineError;
use error_stack::Report;

#[derive(Debug)]
pub enum CliError {
    /// Configuration file error
    Config(String),
    /// Auction request could not be prepared
    Pipeline(Report<PipelineError>),
    /// IO error
    Io(std::io::Error),
    /// JSON encoding or decoding error
    Json(String),
    /// TOML parsing error
    Toml(String),
    /// Logger could not be installed
    Logging(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Pipeline(report) => write!(f, "Pipeline error: {:?}", report),
            CliError::Io(err) => write!(f, "IO error: {}", err),
            CliError::Json(msg) => write!(f, "JSON error: {}", msg),
            CliError::Toml(msg) => write!(f, "TOML error: {}", msg),
            CliError::Logging(msg) => write!(f, "Logging error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Io(err) => Some(err),
            CliError::Pipeline(report) => Some(report.current_context()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(err)
    }
}

impl From<Report<PipelineError>> for CliError {
    fn from(report: Report<PipelineError>) -> Self {
        CliError::Pipeline(report)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Json(err.to_string())
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Toml(err.to_string())
    }
}

impl From<log::SetLoggerError> for CliError {
    fn from(err: log::SetLoggerError) -> Self {
        CliError::Logging(err.to_string())
    }
}
