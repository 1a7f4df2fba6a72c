//! Per-sensor frame source: archives for every family plus the user callback

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use contracts::{AdditionalData, Frame, FrameCallback, FrameExtension, MetadataParserMap, SensorName};
use tracing::{debug, error};

use crate::{ArchiveError, ArchiveStats, FrameArchive, FrameQueueSizeOption, Result};

/// Pools and callback of one sensor.
///
/// Empty until [`FrameSource::init`]; [`FrameSource::reset`] returns it to that state.
pub struct FrameSource {
    limit: Arc<AtomicU32>,
    archives: RwLock<BTreeMap<FrameExtension, Arc<FrameArchive>>>,
    callback: Mutex<Option<FrameCallback>>,
    parsers: Mutex<Option<Arc<MetadataParserMap>>>,
    stats: Arc<ArchiveStats>,
}

impl FrameSource {
    pub fn new(max_in_flight: u32) -> Self {
        Self {
            limit: Arc::new(AtomicU32::new(max_in_flight)),
            archives: RwLock::new(BTreeMap::new()),
            callback: Mutex::new(None),
            parsers: Mutex::new(None),
            stats: Arc::new(ArchiveStats::new()),
        }
    }

    /// Create one archive per supported family, replacing any previous ones
    pub fn init(&self, parsers: Arc<MetadataParserMap>) {
        let mut archives = self.archives.write().unwrap_or_else(PoisonError::into_inner);
        archives.clear();
        for extension in FrameExtension::ALL {
            archives.insert(
                extension,
                Arc::new(
                    FrameArchive::new(extension, self.limit.clone(), Some(parsers.clone()))
                        .with_stats(self.stats.clone()),
                ),
            );
        }
        *self.parsers.lock().unwrap_or_else(PoisonError::into_inner) = Some(parsers);
        debug!(families = archives.len(), "frame source initialized");
    }

    pub fn is_initialized(&self) -> bool {
        !self.archives.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    fn archive(&self, extension: FrameExtension) -> Result<Arc<FrameArchive>> {
        self.archives
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&extension)
            .cloned()
            .ok_or(ArchiveError::UnsupportedFrameType(extension))
    }

    /// `Ok(None)` when the family is at its in-flight limit
    pub fn alloc_and_track(
        &self,
        extension: FrameExtension,
        size: usize,
        additional: AdditionalData,
    ) -> Result<Option<Frame>> {
        Ok(self.archive(extension)?.alloc_and_track(size, additional))
    }

    pub fn set_sensor(&self, sensor: SensorName) {
        for archive in self.archives.read().unwrap_or_else(PoisonError::into_inner).values() {
            archive.set_sensor(sensor.clone());
        }
    }

    pub fn set_callback(&self, callback: FrameCallback) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn get_callback(&self) -> Option<FrameCallback> {
        self.callback.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Hand the frame to the user callback. A panicking callback is logged
    /// and contained. Returns whether the callback ran to completion.
    pub fn invoke_callback(&self, frame: Frame) -> bool {
        let Some(callback) = self.get_callback() else {
            return false;
        };
        match catch_unwind(AssertUnwindSafe(move || callback(frame))) {
            Ok(()) => true,
            Err(payload) => {
                self.stats.inc_callback_panics();
                error!(panic = %panic_message(payload.as_ref()), "panic during user callback");
                false
            }
        }
    }

    /// Mark a user callback on a frame of `extension` as executing until the guard is dropped
    pub fn begin_callback(&self, extension: FrameExtension) -> Option<CallbackGuard> {
        let archive = self.archive(extension).ok()?;
        archive.callback_started();
        Some(CallbackGuard { archive })
    }

    pub fn pending_callbacks(&self, extension: FrameExtension) -> usize {
        self.archive(extension)
            .map(|a| a.pending_callbacks())
            .unwrap_or(0)
    }

    pub fn in_flight(&self, extension: FrameExtension) -> usize {
        self.archive(extension).map(|a| a.in_flight()).unwrap_or(0)
    }

    /// Drain recycled buffers of every archive
    pub fn flush(&self) {
        for archive in self.archives.read().unwrap_or_else(PoisonError::into_inner).values() {
            archive.flush();
        }
    }

    /// Drop callback, archives and metadata parsers
    pub fn reset(&self) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.archives.write().unwrap_or_else(PoisonError::into_inner).clear();
        *self.parsers.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn metadata_parsers(&self) -> Option<Arc<MetadataParserMap>> {
        self.parsers.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Allocation counters across every archive and re-init
    pub fn stats(&self) -> &Arc<ArchiveStats> {
        &self.stats
    }

    /// Option bound to this source's in-flight limit
    pub fn queue_size_option(&self) -> Arc<FrameQueueSizeOption> {
        Arc::new(FrameQueueSizeOption::new(self.limit.clone()))
    }
}

impl Default for FrameSource {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Keeps the pending-callback count raised while alive
pub struct CallbackGuard {
    archive: Arc<FrameArchive>,
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        self.archive.callback_finished();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
