//! Archive error types

use contracts::{FrameExtension, SensorError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// No pool exists for the requested family, or the source was never initialised
    #[error("requested frame type is not supported: {0}")]
    UnsupportedFrameType(FrameExtension),

    /// Queue size written outside [0, 32]
    #[error("set(frame_queue_size) failed! Given value {0} is out of range.")]
    QueueSizeOutOfRange(f32),
}

impl From<ArchiveError> for SensorError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::UnsupportedFrameType(ext) => SensorError::UnsupportedFrameType(ext.to_string()),
            e @ ArchiveError::QueueSizeOutOfRange(_) => SensorError::invalid_value(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
