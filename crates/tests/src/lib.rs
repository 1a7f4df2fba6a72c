//! # Integration Tests
//!
//! Cross-crate and end-to-end tests.
//!
//! Covers:
//! - synthetic sensor over a mock UVC transport
//! - HID sensor over a mock HID transport
//! - blueprint file -> device -> streaming session
//! - power reference counting under random interleavings

#[cfg(test)]
mod fixtures {
    use std::sync::{Arc, Mutex};

    use contracts::{Format, Fourcc, FourccMap, Frame, FrameCallback, PhysicalProfile, StreamType};
    use mock_backend::{MockOwner, MockUvcConfig, MockUvcDevice};
    use sensor::{BackendTimestampReader, UvcSensor};
    use synthetic::{ProcessingBlockFactory, ProfileShape, SyntheticSensor};

    pub const Y8I: Fourcc = Fourcc::from_bytes(*b"Y8I ");
    pub const Z16: Fourcc = Fourcc::from_bytes(*b"Z16 ");

    pub fn mode(fourcc: Fourcc, width: u32, height: u32, fps: u32) -> PhysicalProfile {
        PhysicalProfile {
            width,
            height,
            fps,
            fourcc,
        }
    }

    pub struct StereoRig {
        pub device: Arc<MockUvcDevice>,
        pub owner: Arc<MockOwner>,
        pub sensor: SyntheticSensor,
    }

    /// Depth passthrough plus a Y8I split into infrared 1 / 2
    pub fn stereo(config: MockUvcConfig) -> StereoRig {
        let device = Arc::new(MockUvcDevice::new(config));
        let owner = Arc::new(MockOwner::new());
        let fourccs = FourccMap::new()
            .with_format(Y8I, Format::Y8i)
            .with_stream(Y8I, StreamType::Infrared)
            .with_format(Z16, Format::Z16)
            .with_stream(Z16, StreamType::Depth)
            .into_shared();
        let raw = Arc::new(UvcSensor::new(
            "Stereo Module (raw)",
            device.clone(),
            Box::new(BackendTimestampReader::new()),
            owner.clone(),
            fourccs,
        ));
        let sensor = SyntheticSensor::new("Stereo Module", raw, owner.clone());
        let depth = ProfileShape::new(StreamType::Depth, 0, Format::Z16);
        sensor.register_processing_blocks([
            ProcessingBlockFactory::identity(depth, vec![depth]),
            ProcessingBlockFactory::interleaved_split(
                ProfileShape::new(StreamType::Infrared, 0, Format::Y8i),
                ProfileShape::new(StreamType::Infrared, 1, Format::Y8),
                ProfileShape::new(StreamType::Infrared, 2, Format::Y8),
            ),
        ]);
        StereoRig { device, owner, sensor }
    }

    pub fn collector() -> (FrameCallback, Arc<Mutex<Vec<Frame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        (Arc::new(move |f| sink.lock().unwrap().push(f)), frames)
    }
}

#[cfg(test)]
mod synthetic_e2e_tests {
    use std::sync::Arc;

    use contracts::{Format, FrameExtension, OptionId, ProfileTag, StreamProfile, StreamType};
    use mock_backend::{MockUvcConfig, UvcCall};
    use sensor::Sensor;

    use crate::fixtures::{collector, mode, stereo, Y8I, Z16};

    fn config() -> MockUvcConfig {
        MockUvcConfig {
            profiles: vec![mode(Z16, 4, 2, 30), mode(Y8I, 4, 2, 30)],
            ..Default::default()
        }
    }

    fn infrared(index: i32) -> StreamProfile {
        StreamProfile::video(StreamType::Infrared, index, Format::Y8, 4, 2, 30)
    }

    /// MockUvcDevice -> UvcSensor -> FormatsConverter -> split block -> user callback
    #[test]
    fn test_split_infrared_end_to_end() {
        let rig = stereo(config());
        let left = infrared(1);
        let right = infrared(2);
        rig.sensor.open(&[left, right]).unwrap();

        // both logical streams come from a single physical mode
        assert_eq!(rig.device.committed(), vec![mode(Y8I, 4, 2, 30)]);
        assert_eq!(rig.device.count(&UvcCall::StreamOn), 1);

        let (callback, frames) = collector();
        rig.sensor.start(callback).unwrap();

        let pixels: Vec<u8> = (0..16).collect();
        assert!(rig.device.inject_frame(mode(Y8I, 4, 2, 30), &pixels, &[], 12.5));

        {
            let frames = frames.lock().unwrap();
            assert_eq!(frames.len(), 2);
            let by_index = |i: i32| frames.iter().find(|f| f.profile().map(|p| p.index) == Some(i)).unwrap();
            assert_eq!(by_index(1).data(), &[0, 2, 4, 6, 8, 10, 12, 14]);
            assert_eq!(by_index(2).data(), &[1, 3, 5, 7, 9, 11, 13, 15]);
            assert!(frames.iter().all(|f| f.extension() == FrameExtension::Video));
            assert!(frames.iter().all(|f| f.timestamp() == 12.5));
        }

        rig.sensor.stop().unwrap();
        rig.sensor.close().unwrap();
        assert!(rig.device.committed().is_empty());
        // the source frame went back to the transport
        assert_eq!(rig.device.released_buffers(), 1);
    }

    #[test]
    fn test_depth_and_infrared_open_two_modes() {
        let rig = stereo(config());
        let depth = StreamProfile::video(StreamType::Depth, 0, Format::Z16, 4, 2, 30);
        rig.sensor.open(&[depth, infrared(1)]).unwrap();

        let mut committed = rig.device.committed();
        committed.sort_by_key(|m| m.fourcc.0);
        let mut expected = vec![mode(Y8I, 4, 2, 30), mode(Z16, 4, 2, 30)];
        expected.sort_by_key(|m| m.fourcc.0);
        assert_eq!(committed, expected);
        assert_eq!(rig.sensor.get_active_streams(), vec![depth, infrared(1)]);
    }

    #[test]
    fn test_catalog_lists_converted_profiles_only() {
        let rig = stereo(config());
        let profiles = rig.sensor.get_stream_profiles(ProfileTag::ANY).unwrap();
        assert_eq!(profiles.len(), 3);
        assert!(profiles.iter().all(|p| p.format != Format::Y8i));
        // same extrinsics reported for each converted stream
        assert_eq!(rig.owner.extrinsics().len(), 3);
    }

    #[test]
    fn test_unresolvable_request_is_configuration_error() {
        let rig = stereo(config());
        let color = StreamProfile::video(StreamType::Color, 0, Format::Rgb8, 4, 2, 30);
        let err = rig.sensor.open(&[color]).unwrap_err();
        assert!(err.is_recoverable());
        assert!(!rig.sensor.is_opened());
    }

    #[test]
    fn test_commit_failure_rolls_back_everything() {
        let rig = stereo(MockUvcConfig {
            fail_commit_at: Some(1),
            ..config()
        });
        let depth = StreamProfile::video(StreamType::Depth, 0, Format::Z16, 4, 2, 30);
        let err = rig.sensor.open(&[depth, infrared(1)]).unwrap_err();

        assert!(err.to_string().contains("failed to resolve the request"));
        assert!(rig.device.committed().is_empty());
        assert!(!rig.sensor.is_opened());
        assert!(rig.sensor.get_active_streams().is_empty());
    }

    #[test]
    fn test_backpressure_drops_without_blocking() {
        let rig = stereo(config());
        rig.sensor
            .raw_sensor()
            .get_option(OptionId::FramesQueueSize)
            .unwrap()
            .set(1.0)
            .unwrap();
        let depth = StreamProfile::video(StreamType::Depth, 0, Format::Z16, 4, 2, 30);
        rig.sensor.open(&[depth]).unwrap();

        let (callback, frames) = collector();
        rig.sensor.start(callback).unwrap();
        for i in 0..3 {
            rig.device.inject_frame(mode(Z16, 4, 2, 30), &[0; 16], &[], i as f64);
        }

        // the first frame is still held by the collector, so the pool is full
        assert_eq!(frames.lock().unwrap().len(), 1);
        let stats = rig.sensor.raw_sensor().base().source().stats().snapshot();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.exhausted, 2);

        frames.lock().unwrap().clear();
        rig.device.inject_frame(mode(Z16, 4, 2, 30), &[0; 16], &[], 3.0);
        assert_eq!(frames.lock().unwrap().len(), 1);
        rig.sensor.stop().unwrap();
    }

    #[test]
    fn test_streaming_state_follows_raw_sensor() {
        let rig = stereo(config());
        rig.sensor.open(&[infrared(1)]).unwrap();
        assert!(rig.sensor.raw_sensor().is_opened());

        rig.sensor.start(Arc::new(|_| {})).unwrap();
        assert!(rig.sensor.raw_sensor().is_streaming());
        assert!(rig.sensor.start(Arc::new(|_| {})).unwrap_err().is_invalid_sequence());
        assert!(rig.sensor.close().unwrap_err().is_invalid_sequence());

        rig.sensor.raw_sensor().stop().unwrap();
        assert!(!rig.sensor.is_streaming());
    }
}

#[cfg(test)]
mod hid_e2e_tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use contracts::{Format, FourccMap, HidHeader, StreamProfile, StreamType, TimestampDomain};
    use mock_backend::{motion_sample, MockHidDevice, MockOwner};
    use sensor::{HidSensor, HidSensorParams, HostTimestampReader, IioHidTimestampReader, RawSensor, Sensor};
    use synthetic::{ProcessingBlockFactory, ProfileShape, SyntheticSensor};

    use crate::fixtures::collector;

    fn motion(stream: StreamType, fps: u32) -> StreamProfile {
        StreamProfile::motion(stream, 0, Format::MotionXyz32f, fps)
    }

    fn header(timestamp_us: u64) -> [u8; HidHeader::SIZE] {
        HidHeader {
            length: HidHeader::SIZE as u8,
            report_type: 0,
            timestamp: timestamp_us,
        }
        .encode()
    }

    fn motion_module() -> (SyntheticSensor, Arc<MockHidDevice>) {
        let device = Arc::new(MockHidDevice::with_sensors(["gyro_3d", "accel_3d"]));
        let owner = Arc::new(MockOwner::new());
        let hid = HidSensor::new(HidSensorParams {
            name: "Motion Module (raw)".into(),
            device: device.clone(),
            iio_timestamp_reader: Box::new(IioHidTimestampReader::new()),
            custom_timestamp_reader: Box::new(HostTimestampReader::new()),
            sampling_frequencies: BTreeMap::from([(StreamType::Gyro, BTreeMap::from([(200, 2000)]))]),
            sensor_profiles: vec![
                ("gyro_3d".to_owned(), motion(StreamType::Gyro, 200)),
                ("accel_3d".to_owned(), motion(StreamType::Accel, 100)),
            ],
            owner: owner.clone(),
            fourcc_map: FourccMap::new().into_shared(),
        })
        .unwrap();
        // gyro and accel run at different rates here
        hid.set_shared_imu_bus(false);
        let raw: Arc<dyn RawSensor> = Arc::new(hid);
        let sensor = SyntheticSensor::new("Motion Module", raw, owner);
        for stream in [StreamType::Gyro, StreamType::Accel] {
            let shape = ProfileShape::new(stream, 0, Format::MotionXyz32f);
            sensor.register_processing_block(ProcessingBlockFactory::identity(shape, vec![shape]));
        }
        (sensor, device)
    }

    #[test]
    fn test_hid_samples_reach_user_callback() {
        let (sensor, device) = motion_module();
        sensor
            .open(&[motion(StreamType::Gyro, 200), motion(StreamType::Accel, 100)])
            .unwrap();

        let (callback, frames) = collector();
        sensor.start(callback).unwrap();

        assert!(device.inject_sample("gyro_3d", &motion_sample(0.1, 0.2, 0.3, 0.0), &header(5_000)));
        assert!(device.inject_sample("accel_3d", &motion_sample(0.0, -9.8, 0.0, 0.0), &header(7_000)));

        {
            let frames = frames.lock().unwrap();
            assert_eq!(frames.len(), 2);
            assert_eq!(frames[0].profile().map(|p| p.stream), Some(StreamType::Gyro));
            assert_eq!(frames[0].timestamp(), 5.0);
            assert_eq!(frames[0].timestamp_domain(), TimestampDomain::HardwareClock);
            assert_eq!(frames[1].profile().map(|p| p.stream), Some(StreamType::Accel));
            assert_eq!(frames[1].len(), 12);
        }

        sensor.stop().unwrap();
        assert!(!device.is_capturing());
        sensor.start(Arc::new(|_| {})).unwrap();
        sensor.stop().unwrap();
        sensor.close().unwrap();
    }

    #[test]
    fn test_samples_after_stop_are_ignored() {
        let (sensor, device) = motion_module();
        sensor.open(&[motion(StreamType::Gyro, 200)]).unwrap();
        let (callback, frames) = collector();
        sensor.start(callback).unwrap();
        sensor.stop().unwrap();

        assert!(!device.inject_sample("gyro_3d", &motion_sample(0.0, 0.0, 0.0, 0.0), &header(1)));
        assert!(frames.lock().unwrap().is_empty());
    }
}

#[cfg(test)]
mod blueprint_e2e_tests {
    use std::io::Write;
    use std::time::Duration;

    use config_loader::ConfigLoader;
    use contracts::{ProfileTag, StreamType};
    use depthcam_cli::pipeline::{DeviceRig, Session, SessionConfig};
    use sensor::Sensor;

    const DEVICE_TOML: &str = r#"
[device]
name = "D435i"
serial = "0001"
global_time = true

[[sensors]]
name = "Stereo Module"
kind = "uvc"
frames_queue_size = 16

[sensors.fourcc_formats]
"Y8I " = "y8i"
"Z16 " = "z16"

[sensors.fourcc_streams]
"Y8I " = "infrared"
"Z16 " = "depth"

[[sensors.physical_profiles]]
fourcc = "Z16 "
width = 8
height = 4
fps = 30

[[sensors.physical_profiles]]
fourcc = "Y8I "
width = 8
height = 4
fps = 30

[[sensors.converters]]
name = "depth"
source = { stream = "depth", format = "z16" }
targets = [{ stream = "depth", format = "z16" }]

[[sensors.converters]]
name = "y8i split"
source = { stream = "infrared", format = "y8i" }
targets = [
    { stream = "infrared", index = 1, format = "y8" },
    { stream = "infrared", index = 2, format = "y8" },
]

[[sensors]]
name = "Motion Module"
kind = "hid"
shared_imu_bus = true

[[sensors.hid_profiles]]
sensor_name = "gyro_3d"
stream = "gyro"
format = "motion_xyz32f"
fps = 200

[[sensors.hid_profiles]]
sensor_name = "accel_3d"
stream = "accel"
format = "motion_xyz32f"
fps = 200

[[sensors.fps_to_sampling_frequency]]
stream = "gyro"
fps = 200
frequency = 2000
"#;

    fn load() -> DeviceRig {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(DEVICE_TOML.as_bytes()).unwrap();
        let blueprint = ConfigLoader::load_from_path(file.path()).unwrap();
        DeviceRig::from_blueprint(&blueprint).unwrap()
    }

    #[test]
    fn test_blueprint_builds_advertised_profiles() {
        let rig = load();
        let stereo = rig.sensor("Stereo Module").unwrap().sensor().clone();
        let streams: Vec<_> = stereo
            .get_stream_profiles(ProfileTag::ANY)
            .unwrap()
            .iter()
            .map(|p| (p.stream, p.index))
            .collect();
        assert!(streams.contains(&(StreamType::Depth, 0)));
        assert!(streams.contains(&(StreamType::Infrared, 1)));
        assert!(streams.contains(&(StreamType::Infrared, 2)));

        let motion = rig.sensor("Motion Module").unwrap().sensor().clone();
        assert_eq!(motion.get_stream_profiles(ProfileTag::ANY).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_session_streams_every_sensor() {
        let rig = load();
        let config = SessionConfig {
            rate_hz: 200.0,
            max_frames: Some(40),
            timeout: Some(Duration::from_secs(10)),
        };
        let stats = Session::new(&rig, &[], config)
            .unwrap()
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.frames_received, 40);
        assert_eq!(stats.active_sensors, 2);
        assert_eq!(stats.archives.len(), 2);
        assert!(stats.archives.iter().all(|(_, s)| s.callback_panics == 0));
        // global time was enabled on open and disabled on close
        let clock = rig.owner().clock().unwrap();
        assert!(clock.toggles() >= 2);
        assert!(!clock.is_enabled());
        assert!(rig.sensors().iter().all(|s| !s.sensor().is_opened()));
    }
}

#[cfg(test)]
mod power_tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use contracts::Result;
    use rand::Rng;
    use sensor::{PowerController, PowerSwitch, PowerToken};

    #[derive(Default)]
    struct TrackingSwitch {
        on: AtomicBool,
        power_ons: AtomicUsize,
        power_offs: AtomicUsize,
        violations: AtomicUsize,
    }

    struct SharedSwitch(Arc<TrackingSwitch>);

    impl PowerSwitch for SharedSwitch {
        fn power_on(&self) -> Result<()> {
            let switch = &self.0;
            if switch.on.swap(true, Ordering::SeqCst) {
                switch.violations.fetch_add(1, Ordering::SeqCst);
            }
            switch.power_ons.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn power_off(&self) -> Result<()> {
            let switch = &self.0;
            if !switch.on.swap(false, Ordering::SeqCst) {
                switch.violations.fetch_add(1, Ordering::SeqCst);
            }
            switch.power_offs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Random acquire / release interleavings from several threads: the device
    /// is on exactly while at least one token is alive.
    #[test]
    fn test_power_refcount_random_interleavings() {
        let switch = Arc::new(TrackingSwitch::default());
        let controller = PowerController::new(Box::new(SharedSwitch(switch.clone())));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let controller = controller.clone();
                let switch = switch.clone();
                thread::spawn(move || {
                    let mut rng = rand::rng();
                    let mut held: Vec<PowerToken> = Vec::new();
                    for _ in 0..500 {
                        if held.is_empty() || rng.random_bool(0.5) {
                            held.push(controller.acquire().unwrap());
                        } else {
                            let idx = rng.random_range(0..held.len());
                            held.swap_remove(idx);
                        }
                        if !held.is_empty() {
                            assert!(switch.on.load(Ordering::SeqCst));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(controller.users(), 0);
        assert!(!switch.on.load(Ordering::SeqCst));
        assert_eq!(switch.violations.load(Ordering::SeqCst), 0);
        assert_eq!(
            switch.power_ons.load(Ordering::SeqCst),
            switch.power_offs.load(Ordering::SeqCst)
        );
    }

    /// N threads hold a token at the same time, then all release: one
    /// power-on, one power-off.
    #[test]
    fn test_power_overlapping_holders_switch_once() {
        const HOLDERS: usize = 8;
        let switch = Arc::new(TrackingSwitch::default());
        let controller = PowerController::new(Box::new(SharedSwitch(switch.clone())));
        let all_acquired = Arc::new(Barrier::new(HOLDERS));

        let handles: Vec<_> = (0..HOLDERS)
            .map(|_| {
                let controller = controller.clone();
                let all_acquired = all_acquired.clone();
                thread::spawn(move || {
                    let token = controller.acquire().unwrap();
                    all_acquired.wait();
                    drop(token);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(switch.power_ons.load(Ordering::SeqCst), 1);
        assert_eq!(switch.power_offs.load(Ordering::SeqCst), 1);
        assert_eq!(controller.users(), 0);
        assert!(!switch.on.load(Ordering::SeqCst));
        assert_eq!(switch.violations.load(Ordering::SeqCst), 0);
    }
}
