//! The device a sensor belongs to, and its optional capabilities

use crate::{CameraInfo, StreamProfile};

/// Global-time capability: keeps host and device clocks correlated while streaming
pub trait GlobalTimeControl: Send + Sync {
    fn enable_time_diff_keeper(&self, enable: bool);
}

/// Owning device as seen from a sensor
pub trait DeviceOwner: Send + Sync {
    /// Device-level info consulted when the sensor itself lacks an entry
    fn get_info(&self, info: CameraInfo) -> Option<String>;

    /// Mark default / superset / debug profiles
    fn tag_profiles(&self, _profiles: &mut [StreamProfile]) {}

    /// Record that `target` shares extrinsics with `source`
    fn register_same_extrinsics(&self, _source: &StreamProfile, _target: &StreamProfile) {}

    /// `Some` when the device supports global time
    fn global_time(&self) -> Option<&dyn GlobalTimeControl> {
        None
    }
}

/// Owner with no info and no capabilities; used by tools that drive a bare sensor
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedOwner;

impl DeviceOwner for DetachedOwner {
    fn get_info(&self, _info: CameraInfo) -> Option<String> {
        None
    }
}
