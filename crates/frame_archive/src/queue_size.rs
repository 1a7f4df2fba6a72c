//! User-facing control over the max number of frames in flight

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use contracts::{OptionRange, SensorOption};

use crate::ArchiveError;

pub const QUEUE_SIZE_RANGE: OptionRange = OptionRange::new(0.0, 32.0, 1.0, 16.0);

pub const QUEUE_SIZE_DESCRIPTION: &str = "Max number of frames you can hold at a given time. \
Increasing this number will reduce frame drops but increase latency, and vice versa";

/// Writes go straight to the limit shared by every archive of the source
pub struct FrameQueueSizeOption {
    limit: Arc<AtomicU32>,
}

impl FrameQueueSizeOption {
    pub(crate) fn new(limit: Arc<AtomicU32>) -> Self {
        Self { limit }
    }
}

impl SensorOption for FrameQueueSizeOption {
    fn set(&self, value: f32) -> contracts::Result<()> {
        if !QUEUE_SIZE_RANGE.contains(value) {
            return Err(ArchiveError::QueueSizeOutOfRange(value).into());
        }
        self.limit.store(value as u32, Ordering::SeqCst);
        Ok(())
    }

    fn query(&self) -> contracts::Result<f32> {
        Ok(self.limit.load(Ordering::SeqCst) as f32)
    }

    fn range(&self) -> OptionRange {
        QUEUE_SIZE_RANGE
    }

    fn description(&self) -> &str {
        QUEUE_SIZE_DESCRIPTION
    }
}
