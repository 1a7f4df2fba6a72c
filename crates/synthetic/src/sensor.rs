//! Logical sensor: a raw sensor plus the format conversion pipeline

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{
    CameraInfo, DeviceOwner, FrameCallback, MetadataId, MetadataParser, NotificationCallback, OptionId,
    ProfileKind, ProfileTag, Result, SensorError, SensorName, SensorOption, StreamProfile,
};
use sensor::{RawSensor, Sensor, SensorBase, StreamingChangeCallback};
use tracing::{debug, error, info, instrument};

use crate::{sort_profiles, FormatsConverter, ProcessingBlockFactory};

/// Streaming and opened state always come from the raw sensor
pub struct SyntheticSensor {
    base: SensorBase,
    raw: Arc<dyn RawSensor>,
    converter: Arc<FormatsConverter>,
    /// Options registered on behalf of the active processing blocks
    block_options: Mutex<Vec<OptionId>>,
    config: Mutex<()>,
}

impl SyntheticSensor {
    /// The fourcc mapping of `raw` is shared, not copied
    pub fn new(name: impl Into<SensorName>, raw: Arc<dyn RawSensor>, owner: Arc<dyn DeviceOwner>) -> Self {
        let fourcc_map = raw.base().fourcc_map().clone();
        let base = SensorBase::new(name.into(), owner, fourcc_map);
        // frames are allocated by the raw sensor, so its queue size is the one that matters
        if let Ok(queue_size) = raw.get_option(OptionId::FramesQueueSize) {
            base.options().register(OptionId::FramesQueueSize, queue_size);
        }
        Self {
            base,
            raw,
            converter: Arc::new(FormatsConverter::new()),
            block_options: Mutex::new(Vec::new()),
            config: Mutex::new(()),
        }
    }

    pub fn base(&self) -> &SensorBase {
        &self.base
    }

    pub fn raw_sensor(&self) -> &Arc<dyn RawSensor> {
        &self.raw
    }

    pub fn converter(&self) -> &FormatsConverter {
        &self.converter
    }

    pub fn register_processing_block(&self, factory: ProcessingBlockFactory) {
        self.converter.register_converter(factory);
    }

    pub fn register_processing_blocks(&self, factories: impl IntoIterator<Item = ProcessingBlockFactory>) {
        self.converter.register_converters(factories);
    }

    /// Register `option` on both sensors if its range is sane
    pub fn try_register_option(&self, id: OptionId, option: Arc<dyn SensorOption>) -> bool {
        if !self.base.options().try_register(self.base.name(), id, option.clone()) {
            return false;
        }
        self.raw.register_option(id, option);
        true
    }

    fn lock_config(&self) -> MutexGuard<'_, ()> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_stream_profiles(&self) -> Result<Vec<StreamProfile>> {
        let raw_profiles = self.raw.get_stream_profiles(ProfileTag::ANY | ProfileTag::DEBUG)?;
        let mut profiles = self.converter.get_all_possible_profiles(&raw_profiles);
        for (source, target) in self.converter.mappings() {
            self.base.owner().register_same_extrinsics(&source, &target);
        }
        sort_profiles(&mut profiles);
        Ok(profiles)
    }

    fn register_block_options(&self) {
        let mut cached = self.block_options.lock().unwrap_or_else(PoisonError::into_inner);
        for converter in self.converter.get_active_converters() {
            for (id, option) in converter.block.options() {
                if self.base.options().supports(id) {
                    continue;
                }
                self.register_option(id, option);
                cached.push(id);
            }
        }
    }

    fn unregister_block_options(&self) {
        let mut cached = self.block_options.lock().unwrap_or_else(PoisonError::into_inner);
        for id in cached.drain(..) {
            self.unregister_option(id);
        }
    }
}

/// One line per request for resolution failures
fn describe_request(profile: &StreamProfile) -> String {
    match profile.kind {
        ProfileKind::Video { width, height } => {
            format!("\tFormat: {}, width: {}, height: {}", profile.format, width, height)
        }
        ProfileKind::Motion => format!("\tFormat: {}", profile.format),
    }
}

impl Sensor for SyntheticSensor {
    fn name(&self) -> &SensorName {
        self.base.name()
    }

    #[instrument(name = "synthetic_open", skip(self, requests), fields(sensor = %self.base.name(), requests = requests.len()))]
    fn open(&self, requests: &[StreamProfile]) -> Result<()> {
        let _config = self.lock_config();
        if self.raw.is_streaming() {
            return Err(SensorError::invalid_sequence("open(...)", "sensor is streaming!"));
        }
        if self.raw.is_opened() {
            return Err(SensorError::invalid_sequence("open(...)", "sensor is already opened!"));
        }

        // conversion candidates come from the catalog
        self.get_stream_profiles(ProfileTag::ANY | ProfileTag::DEBUG)?;
        self.converter.prepare_to_convert(requests)?;
        let resolved = self.converter.get_active_source_profiles();
        self.register_block_options();

        self.raw.set_source_owner(self.base.name().clone());
        if let Err(e) = self.raw.open(&resolved) {
            self.unregister_block_options();
            self.converter.clear_active();
            let requested = requests.iter().map(describe_request).collect();
            return Err(SensorError::unresolved(requested, e));
        }

        self.base.set_active_streams(requests);
        info!(raw = resolved.len(), "synthetic sensor opened");
        Ok(())
    }

    #[instrument(name = "synthetic_close", skip(self), fields(sensor = %self.base.name()))]
    fn close(&self) -> Result<()> {
        let _config = self.lock_config();
        self.raw.close()?;
        self.unregister_block_options();
        self.converter.set_frames_callback(None);
        self.converter.clear_active();
        self.base.set_active_streams(&[]);
        info!("synthetic sensor closed");
        Ok(())
    }

    #[instrument(name = "synthetic_start", skip(self, callback), fields(sensor = %self.base.name()))]
    fn start(&self, callback: FrameCallback) -> Result<()> {
        let _config = self.lock_config();
        let previous = self.converter.get_frames_callback();
        self.converter.set_frames_callback(Some(callback));

        let converter = self.converter.clone();
        let process: FrameCallback = Arc::new(move |frame| converter.convert_frame(frame));
        if let Err(e) = self.raw.start(process) {
            self.converter.set_frames_callback(previous);
            return Err(e);
        }
        debug!(sensor = %self.base.name(), "synthetic sensor streaming");
        Ok(())
    }

    #[instrument(name = "synthetic_stop", skip(self), fields(sensor = %self.base.name()))]
    fn stop(&self) -> Result<()> {
        let _config = self.lock_config();
        self.raw.stop()
    }

    fn is_streaming(&self) -> bool {
        self.raw.is_streaming()
    }

    fn is_opened(&self) -> bool {
        self.raw.is_opened()
    }

    fn get_stream_profiles(&self, tag: ProfileTag) -> Result<Vec<StreamProfile>> {
        self.base.get_stream_profiles(tag, || self.init_stream_profiles())
    }

    fn get_active_streams(&self) -> Vec<StreamProfile> {
        self.base.get_active_streams()
    }

    fn get_info(&self, info: CameraInfo) -> Result<String> {
        self.base.get_info(info)
    }

    fn supports_info(&self, info: CameraInfo) -> bool {
        self.base.supports_info(info)
    }

    fn register_option(&self, id: OptionId, option: Arc<dyn SensorOption>) {
        self.raw.register_option(id, option.clone());
        self.base.options().register(id, option);
    }

    fn unregister_option(&self, id: OptionId) {
        self.raw.unregister_option(id);
        self.base.options().unregister(id);
    }

    fn get_option(&self, id: OptionId) -> Result<Arc<dyn SensorOption>> {
        self.base.options().get(id)
    }

    fn supports_option(&self, id: OptionId) -> bool {
        self.base.options().supports(id)
    }

    fn register_metadata(&self, id: MetadataId, parser: Arc<dyn MetadataParser>) {
        self.base.register_metadata(id, parser.clone());
        self.raw.register_metadata(id, parser);
    }

    fn register_notifications_callback(&self, callback: NotificationCallback) {
        self.base.register_notifications_callback(callback.clone());
        self.raw.register_notifications_callback(callback);
    }

    fn get_notifications_callback(&self) -> Option<NotificationCallback> {
        self.base.get_notifications_callback()
    }

    fn register_before_streaming_changes_callback(&self, callback: StreamingChangeCallback) -> u64 {
        self.raw.register_before_streaming_changes_callback(callback)
    }

    fn unregister_before_start_callback(&self, token: u64) {
        self.raw.unregister_before_start_callback(token);
    }

    fn get_frames_callback(&self) -> Option<FrameCallback> {
        self.converter.get_frames_callback()
    }

    fn set_frames_callback(&self, callback: FrameCallback) {
        self.converter.set_frames_callback(Some(callback));
    }
}

impl Drop for SyntheticSensor {
    fn drop(&mut self) {
        if self.is_streaming() {
            if let Err(e) = self.stop() {
                error!(sensor = %self.base.name(), error = %e, "an error has occurred while stop_streaming()");
            }
        }
        if self.is_opened() {
            if let Err(e) = self.close() {
                error!(sensor = %self.base.name(), error = %e, "an error has occurred while closing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Format, FourccMap, Fourcc, Frame, OptionRange, PhysicalProfile, StreamType, FloatOption};
    use mock_backend::{MockOwner, MockUvcConfig, MockUvcDevice};
    use sensor::{BackendTimestampReader, UvcSensor};

    use crate::ProfileShape;

    const YUYV: Fourcc = Fourcc::from_bytes(*b"YUYV");

    fn mode(width: u32, height: u32) -> PhysicalProfile {
        PhysicalProfile {
            width,
            height,
            fps: 30,
            fourcc: YUYV,
        }
    }

    fn setup() -> (SyntheticSensor, Arc<MockUvcDevice>) {
        setup_with(MockUvcConfig {
            profiles: vec![mode(2, 2), mode(4, 2)],
            ..Default::default()
        })
    }

    fn setup_with(config: MockUvcConfig) -> (SyntheticSensor, Arc<MockUvcDevice>) {
        let device = Arc::new(MockUvcDevice::new(config));
        let owner: Arc<MockOwner> = Arc::new(MockOwner::new());
        let fourccs = FourccMap::new()
            .with_format(YUYV, Format::Yuyv)
            .with_stream(YUYV, StreamType::Color)
            .into_shared();
        let raw = Arc::new(UvcSensor::new(
            "RGB Camera raw",
            device.clone(),
            Box::new(BackendTimestampReader::new()),
            owner.clone(),
            fourccs,
        ));
        let synthetic = SyntheticSensor::new("RGB Camera", raw, owner);
        synthetic.register_processing_block(ProcessingBlockFactory::identity(
            ProfileShape::new(StreamType::Color, 0, Format::Yuyv),
            vec![
                ProfileShape::new(StreamType::Color, 0, Format::Rgb8),
                ProfileShape::new(StreamType::Color, 0, Format::Yuyv),
            ],
        ));
        (synthetic, device)
    }

    fn rgb_request(sensor: &SyntheticSensor) -> StreamProfile {
        sensor
            .get_stream_profiles(ProfileTag::ANY)
            .unwrap()
            .into_iter()
            .find(|p| p.format == Format::Rgb8)
            .unwrap()
    }

    #[test]
    fn test_catalog_sorted_rgb_first() {
        let (sensor, _) = setup();
        let profiles = sensor.get_stream_profiles(ProfileTag::ANY).unwrap();
        assert_eq!(profiles.len(), 4);
        assert_eq!(profiles[0].format, Format::Rgb8);
        assert_eq!(profiles[0].width(), 4);
    }

    #[test]
    fn test_open_resolves_to_raw_profile() {
        let (sensor, device) = setup();
        let request = rgb_request(&sensor);
        sensor.open(&[request]).unwrap();

        assert!(sensor.is_opened());
        assert_eq!(device.committed(), vec![mode(4, 2)]);
        assert_eq!(sensor.get_active_streams(), vec![request]);
        assert_eq!(sensor.raw_sensor().get_active_streams()[0].format, Format::Yuyv);
    }

    #[test]
    fn test_stream_delivers_converted_frames() {
        let (sensor, device) = setup();
        let request = rgb_request(&sensor);
        sensor.open(&[request]).unwrap();

        let frames = Arc::new(Mutex::new(Vec::<Frame>::new()));
        let sink = frames.clone();
        sensor.start(Arc::new(move |f| sink.lock().unwrap().push(f))).unwrap();
        assert!(sensor.is_streaming());

        device.inject_frame(mode(4, 2), &[9; 16], &[], 1.0);
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].profile(), Some(&request));
        assert_eq!(frames[0].sensor().map(|s| s.as_str()), Some("RGB Camera"));
    }

    #[test]
    fn test_unresolvable_request_leaves_raw_closed() {
        let (sensor, device) = setup();
        let bgr = StreamProfile::video(StreamType::Color, 0, Format::Bgr8, 4, 2, 30);
        assert!(sensor.open(&[bgr]).is_err());
        assert!(!sensor.is_opened());
        assert!(device.committed().is_empty());
    }

    #[test]
    fn test_raw_failure_lists_requests() {
        let (sensor, _) = setup_with(MockUvcConfig {
            profiles: vec![mode(2, 2), mode(4, 2)],
            fail_commit_at: Some(0),
            ..Default::default()
        });
        let request = rgb_request(&sensor);
        let err = sensor.open(&[request]).unwrap_err();

        assert!(matches!(err, SensorError::UnresolvedRequest { .. }));
        assert!(err.to_string().contains("\tFormat: RGB8, width: 4, height: 2"));
        assert!(!sensor.is_opened());
        assert!(sensor.converter().get_active_converters().is_empty());
    }

    #[test]
    fn test_open_refused_while_raw_opened() {
        let (sensor, _) = setup();
        let request = rgb_request(&sensor);
        let raw_profile = sensor.raw_sensor().get_stream_profiles(ProfileTag::ANY).unwrap()[0];
        sensor.raw_sensor().open(&[raw_profile]).unwrap();

        assert!(sensor.open(&[request]).unwrap_err().is_invalid_sequence());
        sensor.raw_sensor().close().unwrap();
        sensor.open(&[request]).unwrap();
    }

    #[test]
    fn test_options_registered_on_both_sensors() {
        let (sensor, _) = setup();
        let option: Arc<dyn SensorOption> = Arc::new(FloatOption::new(OptionRange::new(0.0, 100.0, 1.0, 50.0), "gain"));
        sensor.register_option(OptionId::Gain, option);
        assert!(sensor.supports_option(OptionId::Gain));
        assert!(sensor.raw_sensor().supports_option(OptionId::Gain));

        sensor.unregister_option(OptionId::Gain);
        assert!(!sensor.raw_sensor().supports_option(OptionId::Gain));
    }

    #[test]
    fn test_queue_size_controls_raw_archive() {
        let (sensor, _) = setup();
        sensor.get_option(OptionId::FramesQueueSize).unwrap().set(3.0).unwrap();
        let raw_limit = sensor
            .raw_sensor()
            .get_option(OptionId::FramesQueueSize)
            .unwrap()
            .query()
            .unwrap();
        assert_eq!(raw_limit, 3.0);
    }

    #[test]
    fn test_close_resets_and_reopens() {
        let (sensor, device) = setup();
        let request = rgb_request(&sensor);
        sensor.open(&[request]).unwrap();
        sensor.start(Arc::new(|_| {})).unwrap();
        sensor.stop().unwrap();
        sensor.close().unwrap();

        assert!(sensor.get_active_streams().is_empty());
        assert!(sensor.get_frames_callback().is_none());
        assert!(device.committed().is_empty());

        sensor.open(&[request]).unwrap();
        assert_eq!(device.committed(), vec![mode(4, 2)]);
    }
}
