//! Mock device owner

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use contracts::{CameraInfo, DeviceOwner, Format, GlobalTimeControl, InfoContainer, ProfileTag, StreamProfile};

/// Records time-diff-keeper toggles
#[derive(Debug, Default)]
pub struct MockGlobalTime {
    enabled: AtomicBool,
    toggles: AtomicUsize,
}

impl MockGlobalTime {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn toggles(&self) -> usize {
        self.toggles.load(Ordering::SeqCst)
    }
}

impl GlobalTimeControl for MockGlobalTime {
    fn enable_time_diff_keeper(&self, enable: bool) {
        self.enabled.store(enable, Ordering::SeqCst);
        self.toggles.fetch_add(1, Ordering::SeqCst);
    }
}

/// Owner with device info, a tagging policy and optional global time.
///
/// Every profile is tagged SUPERSET; profiles equal to one of
/// `default_profiles` also get DEFAULT and formats in `debug_formats` get DEBUG.
#[derive(Default)]
pub struct MockOwner {
    info: InfoContainer,
    global_time: Option<MockGlobalTime>,
    pub default_profiles: Vec<StreamProfile>,
    pub debug_formats: Vec<Format>,
    extrinsics: Mutex<Vec<(StreamProfile, StreamProfile)>>,
}

impl MockOwner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global_time(mut self) -> Self {
        self.global_time = Some(MockGlobalTime::default());
        self
    }

    pub fn with_info(mut self, info: CameraInfo, value: impl Into<String>) -> Self {
        self.info.register_info(info, value);
        self
    }

    pub fn with_default_profiles(mut self, profiles: Vec<StreamProfile>) -> Self {
        self.default_profiles = profiles;
        self
    }

    pub fn with_debug_formats(mut self, formats: Vec<Format>) -> Self {
        self.debug_formats = formats;
        self
    }

    pub fn clock(&self) -> Option<&MockGlobalTime> {
        self.global_time.as_ref()
    }

    /// (source, target) pairs registered as sharing extrinsics
    pub fn extrinsics(&self) -> Vec<(StreamProfile, StreamProfile)> {
        self.extrinsics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl DeviceOwner for MockOwner {
    fn get_info(&self, info: CameraInfo) -> Option<String> {
        self.info.get_info(info).map(str::to_owned)
    }

    fn tag_profiles(&self, profiles: &mut [StreamProfile]) {
        for profile in profiles.iter_mut() {
            let mut tag = ProfileTag::SUPERSET;
            if self.default_profiles.contains(profile) {
                tag = tag | ProfileTag::DEFAULT;
            }
            if self.debug_formats.contains(&profile.format) {
                tag = tag | ProfileTag::DEBUG;
            }
            profile.tag = tag;
        }
    }

    fn register_same_extrinsics(&self, source: &StreamProfile, target: &StreamProfile) {
        self.extrinsics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((*source, *target));
    }

    fn global_time(&self) -> Option<&dyn GlobalTimeControl> {
        self.global_time.as_ref().map(|g| g as &dyn GlobalTimeControl)
    }
}
