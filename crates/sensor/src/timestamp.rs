//! Timestamp readers

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Buf;
use contracts::{system_time_ms, HidHeader, SampleContext, StreamType, TimestampDomain, TimestampReader};
use tracing::warn;

const USEC_TO_MSEC: f64 = 0.001;

fn next_count(counters: &Mutex<HashMap<(StreamType, i32), u64>>, sample: &SampleContext<'_>) -> u64 {
    let mut counters = counters.lock().unwrap_or_else(PoisonError::into_inner);
    let counter = counters
        .entry((sample.profile.stream, sample.profile.index))
        .or_insert(0);
    *counter += 1;
    *counter
}

/// Uses the transport timestamp when one was reported, host arrival time otherwise.
/// Counters are kept per (stream, index).
#[derive(Default)]
pub struct BackendTimestampReader {
    counters: Mutex<HashMap<(StreamType, i32), u64>>,
}

impl BackendTimestampReader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimestampReader for BackendTimestampReader {
    fn get_frame_timestamp(&self, sample: &SampleContext<'_>) -> f64 {
        if sample.additional.backend_timestamp > 0.0 {
            sample.additional.backend_timestamp
        } else {
            sample.additional.system_time
        }
    }

    fn get_frame_counter(&self, sample: &SampleContext<'_>) -> u64 {
        next_count(&self.counters, sample)
    }

    fn get_frame_timestamp_domain(&self, sample: &SampleContext<'_>) -> TimestampDomain {
        if sample.additional.backend_timestamp > 0.0 {
            TimestampDomain::HardwareClock
        } else {
            TimestampDomain::SystemTime
        }
    }

    fn reset(&self) {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Host clock only; used for HID custom reports that carry no device timestamp
#[derive(Default)]
pub struct HostTimestampReader {
    counters: Mutex<HashMap<(StreamType, i32), u64>>,
}

impl HostTimestampReader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimestampReader for HostTimestampReader {
    fn get_frame_timestamp(&self, sample: &SampleContext<'_>) -> f64 {
        sample.additional.system_time
    }

    fn get_frame_counter(&self, sample: &SampleContext<'_>) -> u64 {
        next_count(&self.counters, sample)
    }

    fn get_frame_timestamp_domain(&self, _sample: &SampleContext<'_>) -> TimestampDomain {
        TimestampDomain::SystemTime
    }

    fn reset(&self) {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// IIO HID reader.
///
/// With metadata, the device timestamp is trimmed to 32 bits (µs) so it lines
/// up with UVC hardware timestamps. Without metadata it falls back to the host
/// clock and warns once until reset.
#[derive(Default)]
pub struct IioHidTimestampReader {
    /// index 1 counts gyro samples, index 0 everything else
    counters: Mutex<[u64; 2]>,
    started: AtomicBool,
}

impl IioHidTimestampReader {
    pub fn new() -> Self {
        Self::default()
    }

    fn has_metadata(sample: &SampleContext<'_>) -> bool {
        !sample.additional.metadata.is_empty()
    }
}

impl TimestampReader for IioHidTimestampReader {
    fn get_frame_timestamp(&self, sample: &SampleContext<'_>) -> f64 {
        if Self::has_metadata(sample) {
            let blob = &sample.additional.metadata;
            let timestamp = match HidHeader::parse(blob) {
                Some(header) => header.timestamp as u32,
                // fewer than four bytes are zero-extended
                None => blob.as_slice().chain(&[0u8; 4][..]).get_u32_le(),
            };
            return timestamp as f64 * USEC_TO_MSEC;
        }

        if !self.started.swap(true, Ordering::SeqCst) {
            warn!("HID timestamp not found, switching to Host timestamps.");
        }
        system_time_ms()
    }

    fn get_frame_counter(&self, sample: &SampleContext<'_>) -> u64 {
        let index = usize::from(sample.profile.stream == StreamType::Gyro);
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters[index] += 1;
        counters[index]
    }

    fn get_frame_timestamp_domain(&self, sample: &SampleContext<'_>) -> TimestampDomain {
        if Self::has_metadata(sample) {
            TimestampDomain::HardwareClock
        } else {
            TimestampDomain::SystemTime
        }
    }

    fn reset(&self) {
        self.started.store(false, Ordering::SeqCst);
        *self.counters.lock().unwrap_or_else(PoisonError::into_inner) = [0; 2];
    }
}
