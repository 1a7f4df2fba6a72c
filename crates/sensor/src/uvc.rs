//! UVC (video-class) raw sensor

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use contracts::{
    system_time_ms, AdditionalDataParser, DeviceOwner, ExtensionUnit, Format, FrameCallback, FrameExtension,
    MetadataId, NotificationCallback, PhysicalProfile, ProfileTag, RawFrame, RawFrameCallback, Result,
    SampleContext, SensorError, SensorName, SharedFourccMap, StreamProfile, StreamType, TimestampReader,
    UvcDevice,
};
use observability::DropReason;
use tracing::{debug, error, info, instrument, warn};

use crate::base::{verify_supported_requests, LastSeen};
use crate::power::{PowerController, PowerToken, UvcPowerSwitch};
use crate::production;
use crate::traits::delegate_sensor_base;
use crate::{RawSensor, Sensor, SensorBase};

#[derive(Default)]
struct UvcConfig {
    committed: Vec<PhysicalProfile>,
    power: Option<PowerToken>,
}

struct UvcInner {
    base: SensorBase,
    device: Arc<dyn UvcDevice>,
    timestamp_reader: Box<dyn TimestampReader>,
    xus: Arc<RwLock<Vec<ExtensionUnit>>>,
    power: Arc<PowerController>,
    /// GYRO and ACCEL share one transport and must run at the same rate
    shared_imu_bus: AtomicBool,
    /// Configuration lock; serialises open / close / start / stop
    config: Mutex<UvcConfig>,
}

/// Raw sensor driving a [`UvcDevice`]
pub struct UvcSensor {
    inner: Arc<UvcInner>,
}

impl UvcSensor {
    pub fn new(
        name: impl Into<SensorName>,
        device: Arc<dyn UvcDevice>,
        timestamp_reader: Box<dyn TimestampReader>,
        owner: Arc<dyn DeviceOwner>,
        fourcc_map: SharedFourccMap,
    ) -> Self {
        let base = SensorBase::new(name.into(), owner, fourcc_map);
        base.register_metadata(
            MetadataId::BackendTimestamp,
            Arc::new(AdditionalDataParser::backend_timestamp()),
        );
        base.register_metadata(MetadataId::RawFrameSize, Arc::new(AdditionalDataParser::raw_frame_size()));

        let xus = Arc::new(RwLock::new(Vec::new()));
        let power = PowerController::new(Box::new(UvcPowerSwitch::new(device.clone(), xus.clone())));

        Self {
            inner: Arc::new(UvcInner {
                base,
                device,
                timestamp_reader,
                xus,
                power,
                shared_imu_bus: AtomicBool::new(true),
                config: Mutex::new(UvcConfig::default()),
            }),
        }
    }

    pub fn base(&self) -> &SensorBase {
        &self.inner.base
    }

    /// Extension units are initialised after every power-on
    pub fn register_xu(&self, xu: ExtensionUnit) {
        self.inner.xus.write().unwrap_or_else(PoisonError::into_inner).push(xu);
    }

    pub fn set_shared_imu_bus(&self, shared: bool) {
        self.inner.shared_imu_bus.store(shared, Ordering::SeqCst);
    }

    /// Current power reference count
    pub fn power_users(&self) -> usize {
        self.inner.power.users()
    }

    /// Physical modes committed by the last successful open
    pub fn committed_profiles(&self) -> Vec<PhysicalProfile> {
        self.inner.lock_config().committed.clone()
    }
}

impl UvcInner {
    fn lock_config(&self) -> MutexGuard<'_, UvcConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enumerate transport modes under a temporary power reference
    fn init_stream_profiles(self: &Arc<Self>) -> Result<Vec<StreamProfile>> {
        let _power = self.power.acquire()?;
        let modes = self.device.get_profiles()?;

        let mut video = Vec::new();
        let mut motion = Vec::new();
        for mode in modes {
            let format = self.base.fourcc_to_format(mode.fourcc);
            if format == Format::Any {
                continue;
            }
            let stream = self.base.fourcc_to_stream(mode.fourcc);
            if format == Format::MotionXyz32f {
                let profile = StreamProfile::motion(stream, 0, format, mode.fps).with_backend(mode);
                if !motion.contains(&profile) {
                    motion.push(profile);
                }
            } else {
                let profile =
                    StreamProfile::video(stream, 0, format, mode.width, mode.height, mode.fps).with_backend(mode);
                if !video.contains(&profile) {
                    video.push(profile);
                }
            }
        }
        video.extend(motion);
        Ok(video)
    }

    #[instrument(name = "uvc_open", skip(self, requests), fields(sensor = %self.base.name(), requests = requests.len()))]
    fn open(self: &Arc<Self>, requests: &[StreamProfile]) -> Result<()> {
        let mut config = self.lock_config();
        if self.base.is_streaming() {
            return Err(SensorError::invalid_sequence("open(...)", "UVC device is streaming!"));
        }
        if self.base.is_opened() {
            return Err(SensorError::invalid_sequence("open(...)", "UVC device is already opened!"));
        }

        let power = self.power.acquire()?;

        self.base.init_source();

        verify_supported_requests(requests, self.shared_imu_bus.load(Ordering::SeqCst))?;

        let mut committed: Vec<PhysicalProfile> = Vec::with_capacity(requests.len());
        for request in requests {
            let result = match request.backend {
                Some(mode) => self
                    .device
                    .probe_and_commit(mode, self.frame_callback(*request))
                    .map(|()| mode),
                None => Err(SensorError::configuration(format!(
                    "{} has no physical mode to commit",
                    request.describe()
                ))),
            };
            match result {
                Ok(mode) => committed.push(mode),
                Err(e) => {
                    for mode in &committed {
                        if let Err(close_err) = self.device.close(*mode) {
                            debug!(mode = %mode, error = %close_err, "rollback close failed");
                        }
                    }
                    return Err(e);
                }
            }
        }

        self.base.run_on_open(&committed);

        config.power = Some(power);
        config.committed = committed;
        self.base.set_opened(true);

        let notifications = self.base.notifications().clone();
        let on_error: NotificationCallback = Arc::new(move |n| notifications.raise_notification(n));
        if let Err(e) = self.device.stream_on(on_error) {
            let mut message = String::from("\tFormats: \n");
            for mode in &config.committed {
                let _ = writeln!(message, "\t {}", self.base.fourcc_to_format(mode.fourcc));
                let _ = self.device.close(*mode);
            }
            self.reset_streaming();
            config.power = None;
            config.committed.clear();
            self.base.set_opened(false);
            error!(error = %e, "stream_on failed");
            return Err(SensorError::configuration(format!("{message}\n{e}")));
        }

        if let Some(global_time) = self.base.owner().global_time() {
            global_time.enable_time_diff_keeper(true);
        }
        self.base.set_active_streams(requests);
        info!(committed = config.committed.len(), "UVC sensor opened");
        Ok(())
    }

    #[instrument(name = "uvc_close", skip(self), fields(sensor = %self.base.name()))]
    fn close(&self) -> Result<()> {
        let mut config = self.lock_config();
        if self.base.is_streaming() {
            return Err(SensorError::invalid_sequence("close()", "UVC device is streaming!"));
        }
        if !self.base.is_opened() {
            return Err(SensorError::invalid_sequence("close()", "UVC device was not opened!"));
        }

        for mode in &config.committed {
            // device may already be gone
            if let Err(e) = self.device.close(*mode) {
                debug!(mode = %mode, error = %e, "close failed");
            }
        }
        self.reset_streaming();
        if let Some(global_time) = self.base.owner().global_time() {
            global_time.enable_time_diff_keeper(false);
        }
        config.power = None;
        config.committed.clear();
        self.base.set_opened(false);
        self.base.set_active_streams(&[]);
        info!("UVC sensor closed");
        Ok(())
    }

    #[instrument(name = "uvc_start", skip(self, callback), fields(sensor = %self.base.name()))]
    fn start(&self, callback: FrameCallback) -> Result<()> {
        let _config = self.lock_config();
        if self.base.is_streaming() {
            return Err(SensorError::invalid_sequence(
                "start_streaming(...)",
                "UVC device is already streaming!",
            ));
        }
        if !self.base.is_opened() {
            return Err(SensorError::invalid_sequence("start_streaming(...)", "UVC device was not opened!"));
        }

        self.base.raise_on_before_streaming_changes(true);
        self.base.source().set_callback(callback);
        self.base.set_streaming(true);
        self.device.start_callbacks();
        info!(sensor = %self.base.name(), "UVC sensor streaming");
        Ok(())
    }

    #[instrument(name = "uvc_stop", skip(self), fields(sensor = %self.base.name()))]
    fn stop(&self) -> Result<()> {
        let _config = self.lock_config();
        if !self.base.is_streaming() {
            return Err(SensorError::invalid_sequence("stop_streaming()", "UVC device is not streaming!"));
        }

        self.base.set_streaming(false);
        self.device.stop_callbacks();
        self.timestamp_reader.reset();
        self.base.raise_on_before_streaming_changes(false);
        info!(sensor = %self.base.name(), "UVC sensor stopped");
        Ok(())
    }

    fn reset_streaming(&self) {
        self.base.source().flush();
        self.base.source().reset();
        self.timestamp_reader.reset();
    }

    fn frame_callback(self: &Arc<Self>, request: StreamProfile) -> RawFrameCallback {
        let sensor = Arc::downgrade(self);
        let last = Mutex::new(LastSeen::default());
        Arc::new(move |_mode: &PhysicalProfile, raw: RawFrame<'_>| {
            if let Some(sensor) = sensor.upgrade() {
                sensor.on_frame(&request, &last, raw);
            }
        })
    }

    /// Per-frame production path. `raw` is released right after its payload
    /// is copied, or on whichever early return happens first.
    fn on_frame(&self, request: &StreamProfile, last: &Mutex<LastSeen>, raw: RawFrame<'_>) {
        let system_time = system_time_ms();
        let sensor = self.base.name();

        if !self.base.is_streaming() {
            warn!(
                sensor = %sensor,
                stream = %request.stream,
                index = request.index,
                backend_time = raw.backend_time,
                arrived = system_time,
                "frame received with streaming inactive"
            );
            observability::record_frame_dropped(sensor.as_str(), DropReason::NotStreaming);
            raw.release();
            return;
        }

        let previous = *last.lock().unwrap_or_else(PoisonError::into_inner);
        let additional =
            self.base
                .generate_additional_data(&raw, request, self.timestamp_reader.as_ref(), previous, system_time);
        let domain = self.timestamp_reader.get_frame_timestamp_domain(&SampleContext {
            profile: request,
            additional: &additional,
        });
        let timestamp = additional.timestamp;
        let frame_number = additional.frame_number;

        debug!(
            sensor = %sensor,
            stream = %request.stream,
            counter = frame_number,
            index = request.index,
            backend_ts = raw.backend_time,
            system_time,
            diff_ts = system_time - raw.backend_time,
            ts = timestamp,
            ts_domain = ?domain,
            last_frame_number = previous.frame_number,
            last_timestamp = previous.timestamp,
            "frame accepted"
        );
        *last.lock().unwrap_or_else(PoisonError::into_inner) = LastSeen {
            timestamp,
            frame_number,
        };

        let extension = match FrameExtension::from_stream(request.stream) {
            Ok(extension) => extension,
            Err(e) => {
                error!(sensor = %sensor, error = %e, "no frame family for stream");
                return;
            }
        };
        let expected = production::expected_frame_size(request, raw.frame_size());
        let mut frame = match self.base.source().alloc_and_track(extension, expected, additional) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!(sensor = %sensor, stream = %request.stream, "dropped frame, allocation returned none");
                observability::record_frame_dropped(sensor.as_str(), DropReason::AllocationFailed);
                return;
            }
            Err(e) => {
                warn!(sensor = %sensor, error = %e, "frame source unavailable");
                return;
            }
        };
        production::log_if_slow("allocation", system_time);

        production::copy_payload(&mut frame, request, raw.pixels);
        if let Some((width, height)) = request.dimensions() {
            frame.assign_layout(width, height, production::frame_bpp(request));
        }
        frame.set_timestamp_domain(domain);
        frame.set_profile(*request);
        production::log_if_slow("copy", system_time);

        // payload copied; hand the transport buffer back before the user sees the frame
        raw.release();

        self.base.deliver(frame, request);
    }
}

impl Sensor for UvcSensor {
    delegate_sensor_base!();

    fn open(&self, requests: &[StreamProfile]) -> Result<()> {
        self.inner.open(requests)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }

    fn start(&self, callback: FrameCallback) -> Result<()> {
        self.inner.start(callback)
    }

    fn stop(&self) -> Result<()> {
        self.inner.stop()
    }

    fn get_stream_profiles(&self, tag: ProfileTag) -> Result<Vec<StreamProfile>> {
        self.inner
            .base
            .get_stream_profiles(tag, || self.inner.init_stream_profiles())
    }
}

impl RawSensor for UvcSensor {
    fn base(&self) -> &SensorBase {
        &self.inner.base
    }
}

impl Drop for UvcSensor {
    fn drop(&mut self) {
        if self.inner.base.is_streaming() {
            if let Err(e) = self.inner.stop() {
                error!(sensor = %self.inner.base.name(), error = %e, "an error has occurred while stop_streaming()");
            }
        }
        if self.inner.base.is_opened() {
            if let Err(e) = self.inner.close() {
                error!(sensor = %self.inner.base.name(), error = %e, "an error has occurred while closing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Fourcc, FourccMap, OptionId, PowerState, TimestampDomain};
    use mock_backend::{MockOwner, MockUvcConfig, MockUvcDevice, UvcCall};

    use crate::BackendTimestampReader;

    const Z16: Fourcc = Fourcc::from_bytes(*b"Z16 ");
    const IMU: Fourcc = Fourcc::from_bytes(*b"IMU ");
    const JUNK: Fourcc = Fourcc::from_bytes(*b"JUNK");

    fn depth_mode() -> PhysicalProfile {
        PhysicalProfile {
            width: 4,
            height: 2,
            fps: 30,
            fourcc: Z16,
        }
    }

    fn fourccs() -> SharedFourccMap {
        FourccMap::new()
            .with_format(Z16, Format::Z16)
            .with_stream(Z16, StreamType::Depth)
            .with_format(IMU, Format::MotionXyz32f)
            .with_stream(IMU, StreamType::Gyro)
            .into_shared()
    }

    fn setup(config: MockUvcConfig, owner: MockOwner) -> (UvcSensor, Arc<MockUvcDevice>, Arc<MockOwner>) {
        let device = Arc::new(MockUvcDevice::new(config));
        let owner = Arc::new(owner);
        let sensor = UvcSensor::new(
            "Stereo Module",
            device.clone(),
            Box::new(BackendTimestampReader::new()),
            owner.clone(),
            fourccs(),
        );
        (sensor, device, owner)
    }

    fn default_setup() -> (UvcSensor, Arc<MockUvcDevice>, Arc<MockOwner>) {
        setup(MockUvcConfig {
            profiles: vec![depth_mode()],
            ..Default::default()
        }, MockOwner::new())
    }

    fn depth_request(sensor: &UvcSensor) -> StreamProfile {
        sensor.get_stream_profiles(ProfileTag::ANY).unwrap()[0]
    }

    fn collector() -> (FrameCallback, Arc<Mutex<Vec<contracts::Frame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        (Arc::new(move |f| sink.lock().unwrap().push(f)), frames)
    }

    #[test]
    fn test_profiles_video_first_unknown_skipped() {
        let imu = PhysicalProfile {
            width: 1,
            height: 1,
            fps: 200,
            fourcc: IMU,
        };
        let junk = PhysicalProfile { fourcc: JUNK, ..depth_mode() };
        let (sensor, device, _) = setup(MockUvcConfig {
            profiles: vec![imu, junk, depth_mode()],
            ..Default::default()
        }, MockOwner::new());

        let profiles = sensor.get_stream_profiles(ProfileTag::ANY).unwrap();
        assert_eq!(profiles.len(), 2);
        assert!(profiles[0].is_video());
        assert_eq!(profiles[0].format, Format::Z16);
        assert_eq!(profiles[1].stream, StreamType::Gyro);
        assert_eq!(profiles[1].backend, Some(imu));

        // cached after the first query; power released again
        sensor.get_stream_profiles(ProfileTag::ANY).unwrap();
        assert_eq!(device.count(&UvcCall::GetProfiles), 1);
        assert_eq!(sensor.power_users(), 0);
    }

    #[test]
    fn test_lifecycle_delivers_frames() {
        let (sensor, device, _) = default_setup();
        let request = depth_request(&sensor);

        sensor.open(&[request]).unwrap();
        assert!(sensor.is_opened());
        assert_eq!(sensor.power_users(), 1);
        assert_eq!(device.power_state(), PowerState::D0);
        assert_eq!(sensor.get_active_streams(), vec![request]);

        let (callback, frames) = collector();
        sensor.start(callback).unwrap();
        assert!(sensor.is_streaming());

        let pixels: Vec<u8> = (0..16).collect();
        assert!(device.inject_frame(depth_mode(), &pixels, &[], 5.0));
        assert_eq!(device.released_buffers(), 1);

        {
            let frames = frames.lock().unwrap();
            assert_eq!(frames.len(), 1);
            let frame = &frames[0];
            assert_eq!(frame.data(), pixels.as_slice());
            assert_eq!(frame.timestamp(), 5.0);
            assert_eq!(frame.frame_number(), 1);
            assert_eq!(frame.timestamp_domain(), TimestampDomain::HardwareClock);
            assert_eq!(frame.profile(), Some(&request));
            assert_eq!(frame.sensor().map(|s| s.as_str()), Some("Stereo Module"));
            assert_eq!(frame.layout().map(|l| l.stride), Some(8));
        }

        sensor.stop().unwrap();
        sensor.close().unwrap();
        assert!(!sensor.is_opened());
        assert_eq!(sensor.power_users(), 0);
        assert_eq!(device.power_state(), PowerState::D3);
        assert!(device.committed().is_empty());
        assert!(sensor.get_active_streams().is_empty());
    }

    #[test]
    fn test_illegal_transitions_keep_state() {
        let (sensor, _, _) = default_setup();
        let request = depth_request(&sensor);

        assert!(sensor.close().unwrap_err().is_invalid_sequence());
        assert!(sensor.stop().unwrap_err().is_invalid_sequence());
        let (callback, _) = collector();
        assert!(sensor.start(callback.clone()).unwrap_err().is_invalid_sequence());

        sensor.open(&[request]).unwrap();
        let err = sensor.open(&[request]).unwrap_err();
        assert!(err.to_string().contains("already opened"));
        assert!(sensor.is_opened());

        sensor.start(callback.clone()).unwrap();
        assert!(sensor.start(callback).unwrap_err().is_invalid_sequence());
        assert!(sensor.close().unwrap_err().to_string().contains("streaming"));
        assert!(sensor.is_streaming());
    }

    #[test]
    fn test_commit_failure_rolls_back() {
        let (sensor, device, _) = setup(MockUvcConfig {
            profiles: vec![depth_mode()],
            fail_commit_at: Some(1),
            ..Default::default()
        }, MockOwner::new());
        let first = depth_request(&sensor);
        let second = StreamProfile::motion(StreamType::Gyro, 0, Format::MotionXyz32f, 200).with_backend(
            PhysicalProfile {
                width: 1,
                height: 1,
                fps: 200,
                fourcc: IMU,
            },
        );

        assert!(sensor.open(&[first, second]).is_err());
        assert!(!sensor.is_opened());
        assert!(device.committed().is_empty());
        assert_eq!(device.count(&UvcCall::Close(depth_mode())), 1);
        assert_eq!(sensor.power_users(), 0);
    }

    #[test]
    fn test_stream_on_failure_lists_formats() {
        let (sensor, device, _) = setup(MockUvcConfig {
            profiles: vec![depth_mode()],
            fail_stream_on: true,
            ..Default::default()
        }, MockOwner::new());
        let request = depth_request(&sensor);

        let err = sensor.open(&[request]).unwrap_err();
        assert!(err.to_string().contains("Formats"));
        assert!(err.to_string().contains("Z16"));
        assert!(!sensor.is_opened());
        assert!(device.committed().is_empty());
        assert_eq!(sensor.power_users(), 0);
    }

    #[test]
    fn test_late_frame_after_stop_is_released() {
        let (sensor, device, _) = default_setup();
        let request = depth_request(&sensor);
        sensor.open(&[request]).unwrap();
        let (callback, frames) = collector();
        sensor.start(callback).unwrap();
        sensor.stop().unwrap();

        assert!(device.force_frame(depth_mode(), &[0; 16], &[], 1.0));
        assert!(frames.lock().unwrap().is_empty());
        assert_eq!(device.released_buffers(), 1);
    }

    #[test]
    fn test_queue_size_limits_frames_in_flight() {
        let (sensor, device, _) = default_setup();
        let request = depth_request(&sensor);
        sensor.get_option(OptionId::FramesQueueSize).unwrap().set(1.0).unwrap();
        sensor.open(&[request]).unwrap();
        let (callback, frames) = collector();
        sensor.start(callback).unwrap();

        device.inject_frame(depth_mode(), &[0; 16], &[], 1.0);
        device.inject_frame(depth_mode(), &[0; 16], &[], 2.0);
        assert_eq!(frames.lock().unwrap().len(), 1);
        // both transport buffers go back regardless
        assert_eq!(device.released_buffers(), 2);

        frames.lock().unwrap().clear();
        device.inject_frame(depth_mode(), &[0; 16], &[], 3.0);
        assert_eq!(frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_global_time_follows_open_close() {
        let (sensor, _, owner) = setup(MockUvcConfig {
            profiles: vec![depth_mode()],
            ..Default::default()
        }, MockOwner::new().with_global_time());
        let request = depth_request(&sensor);

        sensor.open(&[request]).unwrap();
        assert!(owner.clock().unwrap().is_enabled());
        sensor.close().unwrap();
        assert!(!owner.clock().unwrap().is_enabled());
    }

    #[test]
    fn test_streaming_change_callbacks() {
        let (sensor, _, _) = default_setup();
        let request = depth_request(&sensor);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        sensor.register_before_streaming_changes_callback(Arc::new(move |on| sink.lock().unwrap().push(on)));

        sensor.open(&[request]).unwrap();
        let (callback, _) = collector();
        sensor.start(callback).unwrap();
        sensor.stop().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_on_open_hook_sees_committed_modes() {
        let (sensor, _, _) = default_setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        sensor
            .base()
            .set_on_open(Box::new(move |modes| sink.lock().unwrap().extend_from_slice(modes)));
        sensor.open(&[depth_request(&sensor)]).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![depth_mode()]);
        assert_eq!(sensor.committed_profiles(), vec![depth_mode()]);
    }

    #[test]
    fn test_drop_stops_and_closes() {
        let (sensor, device, _) = default_setup();
        sensor.open(&[depth_request(&sensor)]).unwrap();
        let (callback, _) = collector();
        sensor.start(callback).unwrap();
        drop(sensor);
        assert!(device.committed().is_empty());
        assert!(!device.callbacks_enabled());
        assert_eq!(device.power_state(), PowerState::D3);
    }
}
