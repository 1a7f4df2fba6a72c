//! HID (IMU / GPIO) raw sensor

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use contracts::{
    system_time_ms, AdditionalDataParser, CustomReportField, DeviceOwner, FrameCallback, FrameExtension, Fourcc,
    HidDevice, HidProfile, HidSample, HidSampleCallback, MetadataId, PhysicalProfile, ProfileTag, Result,
    SampleContext, SensorError, SensorName, SharedFourccMap, StreamProfile, StreamType, TimestampReader,
};
use observability::DropReason;
use tracing::{debug, error, info, instrument};

use crate::base::{verify_supported_requests, LastSeen};
use crate::power::{HidPowerSwitch, PowerController, PowerToken};
use crate::traits::delegate_sensor_base;
use crate::{RawSensor, Sensor, SensorBase};

/// Name under which the device reports custom (GPIO) samples
pub const CUSTOM_SENSOR_NAME: &str = "custom";

/// Offset of the GPIO source id inside a custom report
const GPIO_ID_OFFSET: usize = 16;

/// Number of GPIO inputs a custom report can carry
const GPIO_COUNT: u8 = 4;

/// Transport fourcc a motion stream is enumerated with
pub fn stream_to_fourcc(stream: StreamType) -> Result<Fourcc> {
    match stream {
        StreamType::Gyro => Ok(Fourcc::from_bytes(*b"GYRO")),
        StreamType::Accel => Ok(Fourcc::from_bytes(*b"ACCL")),
        StreamType::Gpio => Ok(Fourcc::from_bytes(*b"GPIO")),
        other => Err(SensorError::invalid_value(format!("fourcc of stream {other} not found!"))),
    }
}

/// Construction parameters of a [`HidSensor`]
pub struct HidSensorParams {
    pub name: SensorName,
    pub device: Arc<dyn HidDevice>,
    /// Reader for regular IIO samples
    pub iio_timestamp_reader: Box<dyn TimestampReader>,
    /// Reader for custom-sensor samples
    pub custom_timestamp_reader: Box<dyn TimestampReader>,
    /// stream -> fps -> device sampling frequency
    pub sampling_frequencies: BTreeMap<StreamType, BTreeMap<u32, u32>>,
    /// (device sensor name, logical profile) pairs the device can produce
    pub sensor_profiles: Vec<(String, StreamProfile)>,
    pub owner: Arc<dyn DeviceOwner>,
    pub fourcc_map: SharedFourccMap,
}

/// Profiles and streams chosen by the last open; read on the capture thread
#[derive(Default)]
struct Configured {
    profiles: HashMap<String, StreamProfile>,
    streams: HashSet<StreamType>,
}

#[derive(Default)]
struct HidConfig {
    power: Option<PowerToken>,
}

struct HidInner {
    base: SensorBase,
    device: Arc<dyn HidDevice>,
    iio_timestamp_reader: Box<dyn TimestampReader>,
    custom_timestamp_reader: Box<dyn TimestampReader>,
    sampling_frequencies: BTreeMap<StreamType, BTreeMap<u32, u32>>,
    sensor_profiles: Vec<(String, StreamProfile)>,
    hid_sensors: Vec<String>,
    power: Arc<PowerController>,
    /// GYRO and ACCEL share one bus and must run at the same rate
    shared_imu_bus: AtomicBool,
    configured: RwLock<Configured>,
    config: Mutex<HidConfig>,
}

/// Raw sensor driving a [`HidDevice`]
pub struct HidSensor {
    inner: Arc<HidInner>,
}

impl HidSensor {
    pub fn new(params: HidSensorParams) -> Result<Self> {
        let HidSensorParams {
            name,
            device,
            iio_timestamp_reader,
            custom_timestamp_reader,
            sampling_frequencies,
            sensor_profiles,
            owner,
            fourcc_map,
        } = params;

        let base = SensorBase::new(name, owner, fourcc_map);
        base.register_metadata(
            MetadataId::BackendTimestamp,
            Arc::new(AdditionalDataParser::backend_timestamp()),
        );

        // one sampling frequency per device sensor; the first profile listed wins
        let mut frequency_per_sensor: Vec<HidProfile> = Vec::new();
        for (sensor_name, profile) in &sensor_profiles {
            if frequency_per_sensor.iter().any(|p| &p.sensor_name == sensor_name) {
                continue;
            }
            frequency_per_sensor.push(HidProfile {
                sensor_name: sensor_name.clone(),
                frequency: profile.fps,
            });
        }
        device.register_profiles(&frequency_per_sensor)?;

        let hid_sensors = device.get_sensors();
        let power = PowerController::new(Box::new(HidPowerSwitch::new(device.clone())));

        Ok(Self {
            inner: Arc::new(HidInner {
                base,
                device,
                iio_timestamp_reader,
                custom_timestamp_reader,
                sampling_frequencies,
                sensor_profiles,
                hid_sensors,
                power,
                shared_imu_bus: AtomicBool::new(true),
                configured: RwLock::new(Configured::default()),
                config: Mutex::new(HidConfig::default()),
            }),
        })
    }

    pub fn set_shared_imu_bus(&self, shared: bool) {
        self.inner.shared_imu_bus.store(shared, Ordering::SeqCst);
    }

    pub fn base(&self) -> &SensorBase {
        &self.inner.base
    }

    /// Raw field of a custom-sensor report
    pub fn get_custom_report_data(
        &self,
        custom_sensor: &str,
        report: &str,
        field: CustomReportField,
    ) -> Result<Vec<u8>> {
        self.inner.device.get_custom_report_data(custom_sensor, report, field)
    }

    /// Logical profiles of one device sensor
    pub fn get_sensor_profiles(&self, sensor_name: &str) -> Result<Vec<StreamProfile>> {
        self.inner.get_sensor_profiles(sensor_name)
    }
}

impl HidInner {
    fn lock_config(&self) -> MutexGuard<'_, HidConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get_sensor_profiles(&self, sensor_name: &str) -> Result<Vec<StreamProfile>> {
        self.sensor_profiles
            .iter()
            .filter(|(name, _)| name == sensor_name)
            .map(|(_, profile)| {
                let backend = PhysicalProfile {
                    width: 1,
                    height: 1,
                    fps: profile.fps,
                    fourcc: stream_to_fourcc(profile.stream)?,
                };
                Ok(StreamProfile::motion(profile.stream, profile.index, profile.format, profile.fps)
                    .with_backend(backend))
            })
            .collect()
    }

    fn init_stream_profiles(&self) -> Result<Vec<StreamProfile>> {
        let mut profiles = Vec::new();
        for sensor_name in self.hid_sensors.iter().rev() {
            profiles.extend(self.get_sensor_profiles(sensor_name)?);
        }
        Ok(profiles)
    }

    fn sensor_name_of(&self, stream: StreamType) -> Result<&str> {
        self.sensor_profiles
            .iter()
            .find(|(_, profile)| profile.stream == stream)
            .map(|(name, _)| name.as_str())
            .ok_or_else(|| SensorError::invalid_value(format!("format {stream} not found!")))
    }

    fn sampling_frequency(&self, stream: StreamType, fps: u32) -> u32 {
        self.sampling_frequencies
            .get(&stream)
            .and_then(|by_fps| by_fps.get(&fps))
            .copied()
            .unwrap_or(fps)
    }

    #[instrument(name = "hid_open", skip(self, requests), fields(sensor = %self.base.name(), requests = requests.len()))]
    fn open(&self, requests: &[StreamProfile]) -> Result<()> {
        let mut config = self.lock_config();
        if self.base.is_streaming() {
            return Err(SensorError::invalid_sequence("open(...)", "Hid device is streaming!"));
        }
        if self.base.is_opened() {
            return Err(SensorError::invalid_sequence("open(...)", "Hid device is already opened!"));
        }
        verify_supported_requests(requests, self.shared_imu_bus.load(Ordering::SeqCst))?;

        let mut configured = Configured::default();
        let mut device_profiles = Vec::with_capacity(requests.len());
        for request in requests {
            let sensor_name = self.sensor_name_of(request.stream)?;
            configured.profiles.insert(sensor_name.to_owned(), *request);
            configured.streams.insert(request.stream);
            device_profiles.push(HidProfile {
                sensor_name: sensor_name.to_owned(),
                frequency: self.sampling_frequency(request.stream, request.fps),
            });
        }

        let power = self.power.acquire()?;
        self.device.open(&device_profiles)?;

        *self.configured.write().unwrap_or_else(PoisonError::into_inner) = configured;
        if let Some(global_time) = self.base.owner().global_time() {
            global_time.enable_time_diff_keeper(true);
        }
        config.power = Some(power);
        self.base.set_opened(true);
        self.base.set_active_streams(requests);
        info!(profiles = device_profiles.len(), "HID sensor opened");
        Ok(())
    }

    #[instrument(name = "hid_close", skip(self), fields(sensor = %self.base.name()))]
    fn close(&self) -> Result<()> {
        let mut config = self.lock_config();
        if self.base.is_streaming() {
            return Err(SensorError::invalid_sequence("close()", "Hid device is streaming!"));
        }
        if !self.base.is_opened() {
            return Err(SensorError::invalid_sequence("close()", "Hid device was not opened!"));
        }

        self.device.close()?;
        *self.configured.write().unwrap_or_else(PoisonError::into_inner) = Configured::default();
        config.power = None;
        self.base.set_opened(false);
        if let Some(global_time) = self.base.owner().global_time() {
            global_time.enable_time_diff_keeper(false);
        }
        self.base.set_active_streams(&[]);
        info!("HID sensor closed");
        Ok(())
    }

    #[instrument(name = "hid_start", skip(self, callback), fields(sensor = %self.base.name()))]
    fn start(self: &Arc<Self>, callback: FrameCallback) -> Result<()> {
        let _config = self.lock_config();
        if self.base.is_streaming() {
            return Err(SensorError::invalid_sequence(
                "start_streaming(...)",
                "Hid device is already streaming!",
            ));
        }
        if !self.base.is_opened() {
            return Err(SensorError::invalid_sequence("start_streaming(...)", "Hid device was not opened!"));
        }

        self.base.raise_on_before_streaming_changes(true);
        self.base.init_source();
        self.base.source().set_callback(callback);
        self.base.set_streaming(true);
        if let Err(e) = self.device.start_capture(self.sample_handler()) {
            self.base.set_streaming(false);
            self.base.source().reset();
            error!(sensor = %self.base.name(), error = %e, "start_capture failed");
            return Err(e);
        }
        info!(sensor = %self.base.name(), "HID sensor streaming");
        Ok(())
    }

    #[instrument(name = "hid_stop", skip(self), fields(sensor = %self.base.name()))]
    fn stop(&self) -> Result<()> {
        let _config = self.lock_config();
        if !self.base.is_streaming() {
            return Err(SensorError::invalid_sequence("stop_streaming()", "Hid device is not streaming!"));
        }

        self.device.stop_capture();
        self.base.set_streaming(false);
        self.base.source().flush();
        self.base.source().reset();
        self.iio_timestamp_reader.reset();
        self.custom_timestamp_reader.reset();
        self.base.raise_on_before_streaming_changes(false);
        info!(sensor = %self.base.name(), "HID sensor stopped");
        Ok(())
    }

    fn sample_handler(self: &Arc<Self>) -> HidSampleCallback {
        let sensor = Arc::downgrade(self);
        let last = Mutex::new(HashMap::<StreamType, LastSeen>::new());
        Arc::new(move |sample: HidSample<'_>| {
            if let Some(sensor) = sensor.upgrade() {
                sensor.on_sample(&last, sample);
            }
        })
    }

    fn on_sample(&self, last: &Mutex<HashMap<StreamType, LastSeen>>, sample: HidSample<'_>) {
        let system_time = system_time_ms();
        let sensor = self.base.name();
        let HidSample { sensor_name, frame: raw } = sample;

        if !self.base.is_streaming() {
            info!(sensor = %sensor, hid_sensor = sensor_name, "HID frame received while not streaming");
            observability::record_frame_dropped(sensor.as_str(), DropReason::NotStreaming);
            return;
        }

        let (request, reader) = if sensor_name == CUSTOM_SENSOR_NAME {
            let gpio = raw.pixels.get(GPIO_ID_OFFSET).copied().unwrap_or(u8::MAX);
            let stream = if gpio < GPIO_COUNT {
                StreamType::Gpio
            } else {
                error!(sensor = %sensor, gpio, "unknown GPIO source in custom report");
                StreamType::Any
            };
            let configured = self.configured.read().unwrap_or_else(PoisonError::into_inner);
            if !configured.streams.contains(&stream) {
                debug!(sensor = %sensor, stream = %stream, "Unrequested frame was dropped");
                observability::record_frame_dropped(sensor.as_str(), DropReason::Unrequested);
                return;
            }
            let request = configured
                .profiles
                .get(CUSTOM_SENSOR_NAME)
                .copied()
                .or_else(|| configured.profiles.values().find(|p| p.stream == stream).copied());
            (request, self.custom_timestamp_reader.as_ref())
        } else {
            let configured = self.configured.read().unwrap_or_else(PoisonError::into_inner);
            (configured.profiles.get(sensor_name).copied(), self.iio_timestamp_reader.as_ref())
        };

        let Some(request) = request else {
            debug!(sensor = %sensor, hid_sensor = sensor_name, "Unrequested frame was dropped");
            observability::record_frame_dropped(sensor.as_str(), DropReason::Unrequested);
            return;
        };

        let previous = last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.stream)
            .copied()
            .unwrap_or_default();
        let mut additional = self
            .base
            .generate_additional_data(&raw, &request, reader, previous, system_time);
        let domain = reader.get_frame_timestamp_domain(&SampleContext {
            profile: &request,
            additional: &additional,
        });
        let frame_size = raw.frame_size();
        additional.raw_size = frame_size as u32;
        let timestamp = additional.timestamp;
        let frame_number = additional.frame_number;

        debug!(
            sensor = %sensor,
            stream = %request.stream,
            counter = frame_number,
            system_time,
            ts = timestamp,
            ts_domain = ?domain,
            "HID frame accepted"
        );
        last.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.stream, LastSeen { timestamp, frame_number });

        let mut frame = match self
            .base
            .source()
            .alloc_and_track(FrameExtension::Motion, frame_size, additional)
        {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!(sensor = %sensor, stream = %request.stream, "dropped frame, allocation returned none");
                observability::record_frame_dropped(sensor.as_str(), DropReason::AllocationFailed);
                return;
            }
            Err(e) => {
                error!(sensor = %sensor, error = %e, "frame source unavailable");
                return;
            }
        };

        frame.data_mut().copy_from_slice(raw.pixels);
        frame.set_timestamp_domain(domain);
        frame.set_profile(request);
        raw.release();

        self.base.deliver(frame, &request);
    }
}

impl Sensor for HidSensor {
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

impl RawSensor for HidSensor {
    fn base(&self) -> &SensorBase {
        &self.inner.base
    }
}

impl Drop for HidSensor {
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
