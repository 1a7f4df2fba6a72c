//! Sensor contracts

use std::sync::Arc;

use contracts::{
    CameraInfo, FrameCallback, MetadataId, MetadataParser, NotificationCallback, OptionId, ProfileTag, Result,
    SensorName, SensorOption, StreamProfile,
};

use crate::{SensorBase, StreamingChangeCallback};

/// Public sensor API shared by raw and synthetic sensors.
///
/// State machine: Closed -> (open) -> Opened -> (start) -> Streaming -> (stop)
/// -> Opened -> (close) -> Closed. Any other transition fails with
/// `SensorError::InvalidSequence` and leaves the state untouched.
pub trait Sensor: Send + Sync {
    fn name(&self) -> &SensorName;

    fn open(&self, requests: &[StreamProfile]) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn start(&self, callback: FrameCallback) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn is_streaming(&self) -> bool;

    fn is_opened(&self) -> bool;

    fn get_stream_profiles(&self, tag: ProfileTag) -> Result<Vec<StreamProfile>>;

    fn get_active_streams(&self) -> Vec<StreamProfile>;

    fn get_info(&self, info: CameraInfo) -> Result<String>;

    fn supports_info(&self, info: CameraInfo) -> bool;

    fn register_option(&self, id: OptionId, option: Arc<dyn SensorOption>);

    fn unregister_option(&self, id: OptionId);

    fn get_option(&self, id: OptionId) -> Result<Arc<dyn SensorOption>>;

    fn supports_option(&self, id: OptionId) -> bool;

    fn register_metadata(&self, id: MetadataId, parser: Arc<dyn MetadataParser>);

    fn register_notifications_callback(&self, callback: NotificationCallback);

    fn get_notifications_callback(&self) -> Option<NotificationCallback>;

    fn register_before_streaming_changes_callback(&self, callback: StreamingChangeCallback) -> u64;

    fn unregister_before_start_callback(&self, token: u64);

    fn get_frames_callback(&self) -> Option<FrameCallback>;

    fn set_frames_callback(&self, callback: FrameCallback);
}

/// Transport-backed sensor that a synthetic sensor can wrap
pub trait RawSensor: Sensor {
    fn base(&self) -> &SensorBase;

    /// Name stamped on produced frames
    fn set_source_owner(&self, owner: SensorName) {
        self.base().set_source_owner(owner);
    }
}

/// Implements the [`Sensor`] accessors that only forward to `SensorBase`
macro_rules! delegate_sensor_base {
    () => {
        fn name(&self) -> &contracts::SensorName {
            self.base().name()
        }

        fn is_streaming(&self) -> bool {
            self.base().is_streaming()
        }

        fn is_opened(&self) -> bool {
            self.base().is_opened()
        }

        fn get_active_streams(&self) -> Vec<contracts::StreamProfile> {
            self.base().get_active_streams()
        }

        fn get_info(&self, info: contracts::CameraInfo) -> contracts::Result<String> {
            self.base().get_info(info)
        }

        fn supports_info(&self, info: contracts::CameraInfo) -> bool {
            self.base().supports_info(info)
        }

        fn register_option(&self, id: contracts::OptionId, option: std::sync::Arc<dyn contracts::SensorOption>) {
            self.base().options().register(id, option);
        }

        fn unregister_option(&self, id: contracts::OptionId) {
            self.base().options().unregister(id);
        }

        fn get_option(&self, id: contracts::OptionId) -> contracts::Result<std::sync::Arc<dyn contracts::SensorOption>> {
            self.base().options().get(id)
        }

        fn supports_option(&self, id: contracts::OptionId) -> bool {
            self.base().options().supports(id)
        }

        fn register_metadata(
            &self,
            id: contracts::MetadataId,
            parser: std::sync::Arc<dyn contracts::MetadataParser>,
        ) {
            self.base().register_metadata(id, parser);
        }

        fn register_notifications_callback(&self, callback: contracts::NotificationCallback) {
            self.base().register_notifications_callback(callback);
        }

        fn get_notifications_callback(&self) -> Option<contracts::NotificationCallback> {
            self.base().get_notifications_callback()
        }

        fn register_before_streaming_changes_callback(&self, callback: $crate::StreamingChangeCallback) -> u64 {
            self.base().register_before_streaming_changes_callback(callback)
        }

        fn unregister_before_start_callback(&self, token: u64) {
            self.base().unregister_before_start_callback(token);
        }

        fn get_frames_callback(&self) -> Option<contracts::FrameCallback> {
            self.base().get_frames_callback()
        }

        fn set_frames_callback(&self, callback: contracts::FrameCallback) {
            self.base().set_frames_callback(callback);
        }
    };
}

pub(crate) use delegate_sensor_base;
