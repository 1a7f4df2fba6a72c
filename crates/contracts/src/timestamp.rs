//! Timestamp reader contract

use crate::{AdditionalData, StreamProfile, TimestampDomain};

/// What a timestamp reader gets to look at for one sample
#[derive(Debug, Clone, Copy)]
pub struct SampleContext<'a> {
    pub profile: &'a StreamProfile,
    pub additional: &'a AdditionalData,
}

/// Derives timestamp, counter and clock domain for incoming samples.
///
/// Called concurrently from transport threads; implementations synchronise internally.
pub trait TimestampReader: Send + Sync {
    /// ms
    fn get_frame_timestamp(&self, sample: &SampleContext<'_>) -> f64;

    fn get_frame_counter(&self, sample: &SampleContext<'_>) -> u64;

    fn get_frame_timestamp_domain(&self, sample: &SampleContext<'_>) -> TimestampDomain;

    /// Forget counters and one-shot warnings
    fn reset(&self);
}
