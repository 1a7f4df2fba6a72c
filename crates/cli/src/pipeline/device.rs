//! Device assembly: blueprint -> mock transports -> raw and synthetic sensors

use std::collections::BTreeSet;
use std::sync::Arc;

use contracts::{
    CameraInfo, ConverterConfig, DeviceBlueprint, Format, OptionId, SensorBlueprint, SensorKind, StreamFormatConfig,
    StreamProfile, StreamType,
};
use frame_archive::ArchiveStats;
use mock_backend::{FrameGenerator, GeneratorConfig, MockHidDevice, MockOwner, MockUvcConfig, MockUvcDevice};
use sensor::{
    BackendTimestampReader, HidSensor, HidSensorParams, HostTimestampReader, IioHidTimestampReader, RawSensor, Sensor,
    UvcSensor,
};
use synthetic::{ProcessingBlockFactory, ProfileShape, SyntheticSensor};
use tracing::{debug, info};

use crate::error::Result;

/// Transport behind one sensor
pub enum Transport {
    Uvc(Arc<MockUvcDevice>),
    Hid {
        device: Arc<MockHidDevice>,
        /// Device sensor names fed by the generator
        sensors: Vec<String>,
    },
}

/// One configured sensor: transport, raw sensor and its synthetic wrapper
pub struct SensorRig {
    blueprint: SensorBlueprint,
    raw: Arc<dyn RawSensor>,
    sensor: Arc<SyntheticSensor>,
    transport: Transport,
}

impl SensorRig {
    pub fn name(&self) -> &str {
        &self.blueprint.name
    }

    pub fn blueprint(&self) -> &SensorBlueprint {
        &self.blueprint
    }

    pub fn raw(&self) -> &Arc<dyn RawSensor> {
        &self.raw
    }

    pub fn sensor(&self) -> &Arc<SyntheticSensor> {
        &self.sensor
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Pool counters of the raw sensor, where frames are allocated
    pub fn archive_stats(&self) -> Arc<ArchiveStats> {
        self.raw.base().source().stats().clone()
    }

    /// Start feeding the transport from a background thread
    pub fn start_generator(&self, rate_hz: f64) -> FrameGenerator {
        let config = GeneratorConfig {
            rate_hz,
            ..Default::default()
        };
        match &self.transport {
            Transport::Uvc(device) => {
                FrameGenerator::uvc(device.clone(), self.raw.base().fourcc_map().clone(), config)
            }
            Transport::Hid { device, sensors } => FrameGenerator::hid(device.clone(), sensors.clone(), config),
        }
    }
}

/// All sensors of one device, sharing a mock owner
pub struct DeviceRig {
    owner: Arc<MockOwner>,
    sensors: Vec<SensorRig>,
}

impl DeviceRig {
    pub fn from_blueprint(blueprint: &DeviceBlueprint) -> Result<Self> {
        let owner = Arc::new(build_owner(blueprint));
        let sensors = blueprint
            .sensors
            .iter()
            .map(|sensor| build_sensor(sensor, owner.clone()))
            .collect::<Result<Vec<_>>>()?;

        info!(device = %blueprint.device.name, sensors = sensors.len(), "device assembled");
        Ok(Self { owner, sensors })
    }

    pub fn owner(&self) -> &Arc<MockOwner> {
        &self.owner
    }

    pub fn sensors(&self) -> &[SensorRig] {
        &self.sensors
    }

    pub fn sensor(&self, name: &str) -> Option<&SensorRig> {
        self.sensors.iter().find(|s| s.name() == name)
    }
}

fn build_owner(blueprint: &DeviceBlueprint) -> MockOwner {
    let device = &blueprint.device;
    let mut owner = MockOwner::new().with_info(CameraInfo::Name, device.name.clone());
    if let Some(serial) = &device.serial {
        owner = owner.with_info(CameraInfo::SerialNumber, serial.clone());
    }
    if let Some(firmware) = &device.firmware_version {
        owner = owner.with_info(CameraInfo::FirmwareVersion, firmware.clone());
    }
    if device.global_time {
        owner = owner.with_global_time();
    }
    owner
}

fn build_sensor(blueprint: &SensorBlueprint, owner: Arc<MockOwner>) -> Result<SensorRig> {
    let fourcc_map = blueprint.fourcc_map()?.into_shared();
    let raw_name = format!("{} (raw)", blueprint.name);

    let (raw, transport): (Arc<dyn RawSensor>, Transport) = match blueprint.kind {
        SensorKind::Uvc => {
            let device = Arc::new(MockUvcDevice::new(MockUvcConfig {
                profiles: blueprint.physical_profiles()?,
                ..Default::default()
            }));
            let raw = UvcSensor::new(
                raw_name,
                device.clone(),
                Box::new(BackendTimestampReader::new()),
                owner.clone(),
                fourcc_map,
            );
            raw.set_shared_imu_bus(blueprint.shared_imu_bus);
            (Arc::new(raw), Transport::Uvc(device))
        }
        SensorKind::Hid => {
            let sensors = hid_sensor_names(blueprint);
            let device = Arc::new(MockHidDevice::with_sensors(sensors.clone()));
            let raw = HidSensor::new(HidSensorParams {
                name: raw_name.into(),
                device: device.clone(),
                iio_timestamp_reader: Box::new(IioHidTimestampReader::new()),
                custom_timestamp_reader: Box::new(HostTimestampReader::new()),
                sampling_frequencies: blueprint.sampling_frequencies(),
                sensor_profiles: blueprint
                    .hid_profiles
                    .iter()
                    .map(|p| (p.sensor_name.clone(), StreamProfile::motion(p.stream, p.index, p.format, p.fps)))
                    .collect(),
                owner: owner.clone(),
                fourcc_map,
            })?;
            raw.set_shared_imu_bus(blueprint.shared_imu_bus);
            (Arc::new(raw), Transport::Hid { device, sensors })
        }
    };

    raw.get_option(OptionId::FramesQueueSize)?
        .set(blueprint.frames_queue_size as f32)?;

    let sensor = Arc::new(SyntheticSensor::new(blueprint.name.as_str(), raw.clone(), owner));
    sensor.register_processing_blocks(converter_factories(blueprint));
    debug!(sensor = %blueprint.name, kind = ?blueprint.kind, "sensor assembled");

    Ok(SensorRig {
        blueprint: blueprint.clone(),
        raw,
        sensor,
        transport,
    })
}

/// Distinct HID device sensor names, in declaration order
fn hid_sensor_names(blueprint: &SensorBlueprint) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for profile in &blueprint.hid_profiles {
        if !names.contains(&profile.sensor_name) {
            names.push(profile.sensor_name.clone());
        }
    }
    names
}

fn shape(config: &StreamFormatConfig) -> ProfileShape {
    ProfileShape::new(config.stream, config.index, config.format)
}

fn converter_factory(config: &ConverterConfig) -> ProcessingBlockFactory {
    let source = shape(&config.source);
    match config.targets.as_slice() {
        [left, right] if config.source.format == Format::Y8i => {
            ProcessingBlockFactory::interleaved_split(source, shape(left), shape(right))
        }
        targets => ProcessingBlockFactory::identity(source, targets.iter().map(shape).collect()),
    }
}

/// Configured converters, or a passthrough for every produced stream
pub fn converter_factories(blueprint: &SensorBlueprint) -> Vec<ProcessingBlockFactory> {
    if !blueprint.converters.is_empty() {
        return blueprint.converters.iter().map(converter_factory).collect();
    }

    let mut shapes: BTreeSet<(StreamType, i32, Format)> = BTreeSet::new();
    match blueprint.kind {
        SensorKind::Uvc => {
            for (code, format) in &blueprint.fourcc_formats {
                if let Some(stream) = blueprint.fourcc_streams.get(code) {
                    shapes.insert((*stream, 0, *format));
                }
            }
        }
        SensorKind::Hid => {
            for profile in &blueprint.hid_profiles {
                shapes.insert((profile.stream, profile.index, profile.format));
            }
        }
    }
    shapes
        .into_iter()
        .map(|(stream, index, format)| {
            let shape = ProfileShape::new(stream, index, format);
            ProcessingBlockFactory::identity(shape, vec![shape])
        })
        .collect()
}
