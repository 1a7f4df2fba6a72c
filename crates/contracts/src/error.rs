//! Layered error definitions
//!
//! Categorized by source: sequence / configuration / transport / value.

use thiserror::Error;

/// Unified error type shared by every sensor-facing crate
#[derive(Debug, Error)]
pub enum SensorError {
    // ===== Sequence Errors =====
    /// Illegal state-machine transition; sensor state is left unchanged
    #[error("{operation} failed. {message}")]
    InvalidSequence {
        operation: &'static str,
        message: String,
    },

    // ===== Configuration Errors =====
    /// Duplicate or incompatible stream requests, bad blueprint values
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A logical request could not be resolved into physical profiles
    #[error("failed to resolve the request:\n{}\ninto:\n{source}", .requested.join("\n"))]
    UnresolvedRequest {
        requested: Vec<String>,
        #[source]
        source: Box<SensorError>,
    },

    // ===== Transport Errors =====
    /// Raised by the device collaborator during commit / power transitions
    #[error("transport error: {message}")]
    Transport { message: String },

    // ===== Value Errors =====
    /// Option write out of range, unknown mapping, malformed input
    #[error("invalid value: {message}")]
    InvalidValue { message: String },

    /// Archive has no pool for the requested frame type
    #[error("requested frame type is not supported: {0}")]
    UnsupportedFrameType(String),

    /// Info / option / metadata lookup miss
    #[error("not found: {0}")]
    NotFound(String),
}

impl SensorError {
    /// Create sequence error
    pub fn invalid_sequence(operation: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidSequence {
            operation,
            message: message.into(),
        }
    }

    /// Create configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create invalid value error
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }

    /// Wrap a raw-sensor failure with the logical requests that produced it
    pub fn unresolved(requested: Vec<String>, source: SensorError) -> Self {
        Self::UnresolvedRequest {
            requested,
            source: Box::new(source),
        }
    }

    /// Whether the caller may retry with corrected input
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidSequence { .. }
                | Self::Configuration { .. }
                | Self::UnresolvedRequest { .. }
                | Self::InvalidValue { .. }
        )
    }

    /// Whether this is an illegal state-machine transition
    pub fn is_invalid_sequence(&self) -> bool {
        matches!(self, Self::InvalidSequence { .. })
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, SensorError>;
