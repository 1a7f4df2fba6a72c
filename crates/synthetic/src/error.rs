//! Conversion error types

use contracts::{SensorError, StreamProfile};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    /// No registered converter produces the requested profile
    #[error("no converter produces {}", .0.describe())]
    NoConverter(StreamProfile),

    #[error("request list is empty")]
    EmptyRequest,

    #[error(transparent)]
    Sensor(#[from] SensorError),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

impl From<ConvertError> for SensorError {
    fn from(err: ConvertError) -> Self {
        match err {
            ConvertError::Sensor(inner) => inner,
            other => SensorError::configuration(other.to_string()),
        }
    }
}
