//! Per-family frame pool.
//!
//! Uses index-based tracking:
//! - Slab holds one entry per frame currently owned by a user
//! - HeapRb holds recycled payload buffers for reuse
//!
//! Frames carry a weak handle back to the pool, so frames outliving a reset
//! simply free their buffer.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use contracts::{AdditionalData, Frame, FrameExtension, MetadataParserMap, SensorName};
use ringbuf::{traits::*, HeapRb};
use slab::Slab;
use tracing::{debug, trace};

use crate::ArchiveStats;

/// Upper bound of recycled buffers kept per family
const RECYCLE_CAPACITY: usize = 32;

struct PoolState {
    /// Payload size of each frame in flight
    in_flight: Slab<usize>,
    recycled: HeapRb<Vec<u8>>,
    pending_callbacks: usize,
}

impl PoolState {
    fn new() -> Self {
        Self {
            in_flight: Slab::with_capacity(RECYCLE_CAPACITY),
            recycled: HeapRb::new(RECYCLE_CAPACITY),
            pending_callbacks: 0,
        }
    }
}

fn lock(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded pool for one frame family
pub struct FrameArchive {
    extension: FrameExtension,
    /// Shared with every archive of the owning source and the queue-size option
    limit: Arc<AtomicU32>,
    state: Arc<Mutex<PoolState>>,
    parsers: Option<Arc<MetadataParserMap>>,
    sensor: Mutex<Option<SensorName>>,
    stats: Arc<ArchiveStats>,
}

impl fmt::Debug for FrameArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameArchive")
            .field("extension", &self.extension)
            .field("limit", &self.limit.load(Ordering::Relaxed))
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl FrameArchive {
    pub fn new(extension: FrameExtension, limit: Arc<AtomicU32>, parsers: Option<Arc<MetadataParserMap>>) -> Self {
        Self {
            extension,
            limit,
            state: Arc::new(Mutex::new(PoolState::new())),
            parsers,
            sensor: Mutex::new(None),
            stats: Arc::new(ArchiveStats::new()),
        }
    }

    /// Count into `stats` instead of a private counter set
    pub fn with_stats(mut self, stats: Arc<ArchiveStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<ArchiveStats> {
        &self.stats
    }

    pub fn extension(&self) -> FrameExtension {
        self.extension
    }

    /// Tag frames with the sensor that produced them
    pub fn set_sensor(&self, sensor: SensorName) {
        *self.sensor.lock().unwrap_or_else(PoisonError::into_inner) = Some(sensor);
    }

    /// Allocate a zeroed frame of `size` bytes.
    ///
    /// `None` when the family already has `limit` frames in flight.
    pub fn alloc_and_track(&self, size: usize, additional: AdditionalData) -> Option<Frame> {
        let limit = self.limit.load(Ordering::SeqCst) as usize;
        let (key, mut buf, in_flight) = {
            let mut state = lock(&self.state);
            if state.in_flight.len() >= limit {
                debug!(
                    frame_type = %self.extension,
                    in_flight = state.in_flight.len(),
                    limit,
                    "frame pool exhausted"
                );
                self.stats.inc_exhausted();
                return None;
            }
            let buf = state.recycled.try_pop().unwrap_or_default();
            let key = state.in_flight.insert(size);
            (key, buf, state.in_flight.len())
        };
        buf.clear();
        buf.resize(size, 0);
        self.stats.inc_allocated();
        observability::record_archive_in_flight(self.extension.as_str(), in_flight);

        let pool = Arc::downgrade(&self.state);
        let stats = self.stats.clone();
        let extension = self.extension;
        let mut frame = Frame::new(self.extension, buf, additional)
            .with_metadata_parsers(self.parsers.clone())
            .with_release_hook(Box::new(move |buf| {
                stats.inc_released();
                release(&pool, extension, key, buf);
            }));
        if let Some(sensor) = self.sensor.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            frame.set_sensor(sensor);
        }
        trace!(frame_type = %self.extension, size, in_flight, "frame allocated");
        Some(frame)
    }

    /// Frames currently owned by users
    pub fn in_flight(&self) -> usize {
        lock(&self.state).in_flight.len()
    }

    pub fn recycled(&self) -> usize {
        lock(&self.state).recycled.occupied_len()
    }

    /// Drop recycled buffers; frames in flight are released normally later
    pub fn flush(&self) {
        let mut state = lock(&self.state);
        let mut freed = 0usize;
        while state.recycled.try_pop().is_some() {
            freed += 1;
        }
        if !state.in_flight.is_empty() {
            debug!(
                frame_type = %self.extension,
                pending = state.in_flight.len(),
                freed,
                "archive flushed with frames still in flight"
            );
        }
    }

    pub(crate) fn callback_started(&self) {
        lock(&self.state).pending_callbacks += 1;
    }

    pub(crate) fn callback_finished(&self) {
        let mut state = lock(&self.state);
        state.pending_callbacks = state.pending_callbacks.saturating_sub(1);
    }

    /// Callbacks currently executing on frames of this family
    pub fn pending_callbacks(&self) -> usize {
        lock(&self.state).pending_callbacks
    }
}

fn release(pool: &Weak<Mutex<PoolState>>, extension: FrameExtension, key: usize, buf: Vec<u8>) {
    let Some(state) = pool.upgrade() else {
        return;
    };
    let in_flight = {
        let mut state = lock(&state);
        if state.in_flight.contains(key) {
            state.in_flight.remove(key);
        }
        // Full recycle ring: the buffer is simply freed
        let _ = state.recycled.try_push(buf);
        state.in_flight.len()
    };
    observability::record_archive_in_flight(extension.as_str(), in_flight);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive(limit: u32) -> FrameArchive {
        FrameArchive::new(FrameExtension::Video, Arc::new(AtomicU32::new(limit)), None)
    }

    #[test]
    fn test_alloc_respects_limit() {
        let archive = archive(2);
        let a = archive.alloc_and_track(16, AdditionalData::default()).unwrap();
        let _b = archive.alloc_and_track(16, AdditionalData::default()).unwrap();
        assert!(archive.alloc_and_track(16, AdditionalData::default()).is_none());

        drop(a);
        assert_eq!(archive.in_flight(), 1);
        assert!(archive.alloc_and_track(16, AdditionalData::default()).is_some());

        let stats = archive.stats().snapshot();
        assert_eq!(stats.allocated, 3);
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.released, 2);
    }

    #[test]
    fn test_concurrent_alloc_never_exceeds_limit() {
        let archive = archive(4);
        let (held, rejected) = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let mut held = Vec::new();
                        let mut rejected = 0;
                        for _ in 0..50 {
                            match archive.alloc_and_track(16, AdditionalData::default()) {
                                Some(frame) => held.push(frame),
                                None => rejected += 1,
                            }
                        }
                        (held, rejected)
                    })
                })
                .collect();
            workers.into_iter().fold((Vec::new(), 0), |(mut all, total), worker| {
                let (held, rejected) = worker.join().unwrap();
                all.extend(held);
                (all, total + rejected)
            })
        });

        assert_eq!(held.len(), 4);
        assert_eq!(rejected, 396);
        assert_eq!(archive.in_flight(), 4);
        let stats = archive.stats().snapshot();
        assert_eq!(stats.allocated, 4);
        assert_eq!(stats.exhausted, 396);

        drop(held);
        assert_eq!(archive.in_flight(), 0);
        assert!(archive.alloc_and_track(16, AdditionalData::default()).is_some());
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let archive = archive(0);
        assert!(archive.alloc_and_track(8, AdditionalData::default()).is_none());
    }

    #[test]
    fn test_buffers_are_recycled_and_zeroed() {
        let archive = archive(4);
        let mut frame = archive.alloc_and_track(8, AdditionalData::default()).unwrap();
        frame.data_mut().fill(0xAB);
        drop(frame);
        assert_eq!(archive.recycled(), 1);

        let frame = archive.alloc_and_track(4, AdditionalData::default()).unwrap();
        assert_eq!(archive.recycled(), 0);
        assert_eq!(frame.data(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_flush_keeps_in_flight_frames_valid() {
        let archive = archive(4);
        let frame = archive.alloc_and_track(8, AdditionalData::default()).unwrap();
        drop(archive.alloc_and_track(8, AdditionalData::default()));
        archive.flush();
        assert_eq!(archive.recycled(), 0);
        assert_eq!(archive.in_flight(), 1);
        drop(frame);
        assert_eq!(archive.in_flight(), 0);
    }

    #[test]
    fn test_frame_outliving_archive_is_released_quietly() {
        let archive = archive(1);
        let frame = archive.alloc_and_track(8, AdditionalData::default()).unwrap();
        drop(archive);
        drop(frame);
    }

    #[test]
    fn test_sensor_name_stamped_on_frames() {
        let archive = archive(1);
        archive.set_sensor(SensorName::from("Stereo Module"));
        let frame = archive.alloc_and_track(1, AdditionalData::default()).unwrap();
        assert_eq!(frame.sensor().map(|s| s.as_str()), Some("Stereo Module"));
    }
}
