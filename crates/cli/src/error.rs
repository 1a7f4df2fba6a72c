//! Error types for CLI operations.

use contracts::SensorError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// `--sensor` names a sensor the blueprint does not declare
    #[error("Sensor '{name}' is not declared in the blueprint")]
    SensorNotFound { name: String },

    /// Nothing to stream after filtering
    #[error("Sensor '{sensor}' advertises no stream profiles")]
    NoProfiles { sensor: String },

    /// Session execution error
    #[error("Streaming session failed: {message}")]
    Session { message: String },

    /// Sensor layer error
    #[error(transparent)]
    Sensor(#[from] SensorError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn sensor_not_found(name: impl Into<String>) -> Self {
        Self::SensorNotFound { name: name.into() }
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
